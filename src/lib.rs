//! # Cinder
//!
//! An embedded compiler for a stack machine with a fixed scratch space.
//!
//! Host code builds a tree of [`Expr`] nodes, declares [`ScratchVar`]s and
//! [`Subroutine`]s through a [`Compiler`], and lowers the tree into a graph of
//! basic blocks. The block graph can then be laid out into a linear
//! [`ProgramBc`] and executed on the [`runtime::vm_bc::VmBc`] model.

pub mod bytecode;
pub mod config;
pub mod lang;
pub mod runtime;

pub use bytecode::compile::{Compilation, Compiler};
pub use bytecode::compile_error::CompileError;
pub use bytecode::subroutine::Declaration;
pub use bytecode::{Op, ProgramBc};
pub use config::CompileOptions;
pub use lang::expr::Expr;
pub use lang::scratch::{Slot, SlotId, SlotRequest};
pub use lang::scratch_var::ScratchVar;
pub use lang::subroutine::{Arg, Param, ParamMode, Subroutine, SubroutineId};
pub use lang::types::ValueType;
pub use runtime::{RuntimeError, VmBc, VmBcConfig};
