pub mod block;
pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod layout;
pub mod op;
pub mod stack_check_error;
pub mod subroutine;

pub use ir::{CodeObject, ProgramBc};
pub use op::Op;
