use std::rc::Rc;

use crate::bytecode::op::Op;
use crate::lang::subroutine::{Arg, Subroutine};
use crate::lang::types::ValueType;

/// An expression node built by host code.
///
/// Cloning is cheap: nodes are shared, and two clones of the same node lower
/// to two distinct fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr(Rc<ExprKind>);

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Push an integer constant.
    ///
    /// Stack effect: `( -- n )`
    Int(u64),

    /// Push a byte string constant.
    ///
    /// Stack effect: `( -- b )`
    Bytes(Vec<u8>),

    /// Instruction with children: `args` are evaluated left to right, then
    /// `op` runs on whatever they left on the stack.
    ///
    /// Every operator, scratch load/store and anonymous chained fragment is
    /// one of these.
    Op {
        op: Op,
        args: Vec<Expr>,
        ty: ValueType,
        returns: bool,
    },

    /// Evaluate in order. All but the last element must leave nothing.
    Seq(Vec<Expr>),

    /// Conditional. The condition must be an integer; nonzero takes `then`.
    If {
        cond: Expr,
        then: Expr,
        otherwise: Option<Expr>,
    },

    /// Leave the current subroutine (`retsub`) or the program (`return`).
    Return(Option<Expr>),

    /// Call a subroutine.
    Call { subroutine: Subroutine, args: Vec<Arg> },
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr(Rc::new(kind))
    }

    /// Build an anonymous node that runs `op` after lowering `args`.
    pub fn from_op(op: Op, args: Vec<Expr>, ty: ValueType) -> Self {
        let returns = op.is_terminal();
        Expr::new(ExprKind::Op {
            op,
            args,
            ty,
            returns,
        })
    }

    /// Chain `op` after this expression.
    pub fn then_op(&self, op: Op, ty: ValueType) -> Self {
        Expr::from_op(op, vec![self.clone()], ty)
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0
    }

    /// The type this expression leaves on the stack.
    pub fn value_type(&self) -> ValueType {
        match self.kind() {
            ExprKind::Int(_) => ValueType::Uint64,
            ExprKind::Bytes(_) => ValueType::Bytes,
            ExprKind::Op { ty, .. } => *ty,
            ExprKind::Seq(items) => items
                .last()
                .map(|e| e.value_type())
                .unwrap_or(ValueType::None),
            ExprKind::If {
                then, otherwise, ..
            } => match otherwise {
                Some(otherwise)
                    if then.always_returns() || then.value_type() == ValueType::Any =>
                {
                    otherwise.value_type()
                }
                Some(_) => then.value_type(),
                None => ValueType::None,
            },
            ExprKind::Return(_) => ValueType::None,
            ExprKind::Call { subroutine, .. } => subroutine.return_type(),
        }
    }

    /// Whether every path through this node leaves the enclosing subroutine
    /// or program.
    pub fn always_returns(&self) -> bool {
        match self.kind() {
            ExprKind::Int(_) | ExprKind::Bytes(_) => false,
            ExprKind::Op { returns, .. } => *returns,
            ExprKind::Seq(items) => items.last().is_some_and(|e| e.always_returns()),
            ExprKind::If {
                then, otherwise, ..
            } => {
                then.always_returns() && otherwise.as_ref().is_some_and(|e| e.always_returns())
            }
            ExprKind::Return(_) => true,
            ExprKind::Call { .. } => false,
        }
    }

    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            ExprKind::Int(n) => write!(f, "(int {})", n),
            ExprKind::Bytes(b) => write!(f, "({})", Op::PushBytes(b.clone())),
            ExprKind::Op { op, args, .. } => {
                write!(f, "({}", op)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                write!(f, ")")
            }
            ExprKind::Seq(items) => {
                write!(f, "(seq")?;
                for item in items {
                    write!(f, " {}", item)?;
                }
                write!(f, ")")
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                write!(f, "(if {} {}", cond, then)?;
                if let Some(otherwise) = otherwise {
                    write!(f, " {}", otherwise)?;
                }
                write!(f, ")")
            }
            ExprKind::Return(Some(value)) => write!(f, "(return {})", value),
            ExprKind::Return(None) => write!(f, "(return)"),
            ExprKind::Call { subroutine, args } => {
                write!(f, "(call {}", subroutine.name())?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn int(n: u64) -> Expr {
    Expr::new(ExprKind::Int(n))
}

pub fn bytes(b: impl Into<Vec<u8>>) -> Expr {
    Expr::new(ExprKind::Bytes(b.into()))
}

fn binary(op: Op, a: Expr, b: Expr) -> Expr {
    Expr::from_op(op, vec![a, b], ValueType::Uint64)
}

pub fn add(a: Expr, b: Expr) -> Expr {
    binary(Op::Add, a, b)
}

pub fn sub(a: Expr, b: Expr) -> Expr {
    binary(Op::Sub, a, b)
}

pub fn mul(a: Expr, b: Expr) -> Expr {
    binary(Op::Mul, a, b)
}

pub fn div(a: Expr, b: Expr) -> Expr {
    binary(Op::Div, a, b)
}

pub fn modulo(a: Expr, b: Expr) -> Expr {
    binary(Op::Mod, a, b)
}

pub fn eq(a: Expr, b: Expr) -> Expr {
    binary(Op::Eq, a, b)
}

pub fn ne(a: Expr, b: Expr) -> Expr {
    binary(Op::Ne, a, b)
}

pub fn lt(a: Expr, b: Expr) -> Expr {
    binary(Op::Lt, a, b)
}

pub fn gt(a: Expr, b: Expr) -> Expr {
    binary(Op::Gt, a, b)
}

pub fn le(a: Expr, b: Expr) -> Expr {
    binary(Op::Le, a, b)
}

pub fn ge(a: Expr, b: Expr) -> Expr {
    binary(Op::Ge, a, b)
}

pub fn and(a: Expr, b: Expr) -> Expr {
    binary(Op::And, a, b)
}

pub fn or(a: Expr, b: Expr) -> Expr {
    binary(Op::Or, a, b)
}

pub fn not(a: Expr) -> Expr {
    Expr::from_op(Op::Not, vec![a], ValueType::Uint64)
}

/// Discard the value of `a`.
pub fn pop(a: Expr) -> Expr {
    Expr::from_op(Op::Pop, vec![a], ValueType::None)
}

pub fn err() -> Expr {
    Expr::from_op(Op::Err, vec![], ValueType::None)
}

pub fn seq(items: Vec<Expr>) -> Expr {
    Expr::new(ExprKind::Seq(items))
}

pub fn if_then(cond: Expr, then: Expr) -> Expr {
    Expr::new(ExprKind::If {
        cond,
        then,
        otherwise: None,
    })
}

pub fn if_else(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::new(ExprKind::If {
        cond,
        then,
        otherwise: Some(otherwise),
    })
}

pub fn ret(value: Expr) -> Expr {
    Expr::new(ExprKind::Return(Some(value)))
}

pub fn ret_none() -> Expr {
    Expr::new(ExprKind::Return(None))
}
