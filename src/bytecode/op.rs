use serde::{Deserialize, Serialize};

use crate::lang::subroutine::SubroutineId;

// =============================================================================
// OP - Machine instructions
// =============================================================================

/// A single machine instruction.
///
/// Blocks produced by lowering never contain jumps: control flow between
/// blocks lives on block exits and is only turned into `Jump*`/`Switch` ops
/// by the layout pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    // literals
    PushInt(u64),
    PushBytes(Vec<u8>),

    // stack ops
    Pop,

    // arithmetic (wrapping, 64-bit)
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    // logic
    And,
    Or,
    Not,

    // ==========================================================================
    // Scratch space
    // ==========================================================================
    /// Push the value of a slot whose id is known at build time.
    Load(usize),

    /// Pop a value into a slot whose id is known at build time.
    Store(usize),

    /// ( index -- value ) load from a slot whose id is on the stack.
    Loads,

    /// ( index value -- ) store into a slot whose id is on the stack.
    Stores,

    // ==========================================================================
    // Jumps (layout output only)
    // ==========================================================================
    /// Unconditional relative jump. Offset is added to current ip.
    Jump(i32),

    /// Pop an integer, jump if it is zero.
    JumpIfFalse(i32),

    /// Pop an index `i`, jump by `offsets[i]` if in range, else fall through.
    Switch(Vec<i32>),

    // ==========================================================================
    // Subroutines & termination
    // ==========================================================================
    CallSub(SubroutineId),
    RetSub,

    /// Pop the exit value and halt the program.
    Return,

    /// Fail immediately.
    Err,
}

impl Op {
    /// Minimum feature level that provides this instruction.
    pub fn min_version(&self) -> u8 {
        match self {
            Op::CallSub(_) | Op::RetSub => 4,
            Op::Loads | Op::Stores | Op::Switch(_) => 5,
            _ => 2,
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Op::RetSub | Op::Return | Op::Err)
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::PushInt(_) => "int",
            Op::PushBytes(_) => "byte",
            Op::Pop => "pop",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Le => "<=",
            Op::Ge => ">=",
            Op::And => "&&",
            Op::Or => "||",
            Op::Not => "!",
            Op::Load(_) => "load",
            Op::Store(_) => "store",
            Op::Loads => "loads",
            Op::Stores => "stores",
            Op::Jump(_) => "jump",
            Op::JumpIfFalse(_) => "jump_false",
            Op::Switch(_) => "switch",
            Op::CallSub(_) => "callsub",
            Op::RetSub => "retsub",
            Op::Return => "return",
            Op::Err => "err",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::PushInt(n) => write!(f, "int {}", n),
            Op::PushBytes(bytes) => {
                write!(f, "byte 0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Op::Load(slot) | Op::Store(slot) => write!(f, "{} {}", self.mnemonic(), slot),
            Op::Jump(offset) | Op::JumpIfFalse(offset) => {
                write!(f, "{} {:+}", self.mnemonic(), offset)
            }
            Op::Switch(offsets) => {
                write!(f, "switch")?;
                for offset in offsets {
                    write!(f, " {:+}", offset)?;
                }
                Ok(())
            }
            Op::CallSub(id) => write!(f, "callsub {}", id),
            _ => write!(f, "{}", self.mnemonic()),
        }
    }
}
