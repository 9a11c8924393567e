use crate::bytecode::Op;

#[derive(Debug)]
pub struct StackCheckError {
    pub message: String,
}

impl std::fmt::Display for StackCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stack-check error: {}", self.message)
    }
}

impl StackCheckError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Returns (pops, pushes) for an op, or None if effect is unknown/dynamic.
fn effect(op: &Op) -> Option<(i32, i32)> {
    use Op::*;
    Some(match op {
        PushInt(_) | PushBytes(_) => (0, 1),

        Pop => (1, 0),

        Add | Sub | Mul | Div | Mod => (2, 1),
        Eq | Ne | Lt | Gt | Le | Ge => (2, 1),
        And | Or => (2, 1),
        Not => (1, 1),

        // Scratch space
        Load(_) => (0, 1),
        Store(_) => (1, 0),
        Loads => (1, 1),
        Stores => (2, 0),

        // Jumps
        Jump(_) => (0, 0),
        JumpIfFalse(_) => (1, 0),
        Switch(_) => (1, 0),

        Return => (1, 0),
        RetSub | Err => (0, 0),

        // Depends on the callee's body
        CallSub(_) => return None,
    })
}

/// Check stack effects with a given initial stack height.
///
/// NOTE: This is a linear scan that doesn't follow jump targets, so both
/// arms of a branch are counted. That overestimates the height after a
/// join and never reports a false underflow for lowered code, whose arms
/// only consume what they push themselves.
pub fn check_ops_with_initial(ops: &[Op], initial_height: i32) -> Result<(), StackCheckError> {
    let mut h: i32 = initial_height;

    for (ip, op) in ops.iter().enumerate() {
        match effect(op) {
            Some((pops, pushes)) => {
                h -= pops;
                if h < 0 {
                    return Err(StackCheckError::new(format!(
                        "stack underflow at ip={}, op={}, needed {} items",
                        ip, op, pops
                    )));
                }
                h += pushes;
            }
            None => {
                // A subroutine may consume its arguments and leave anything;
                // from here on the height is unknown.
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Check stack effects starting from empty stack.
pub fn check_ops(ops: &[Op]) -> Result<(), StackCheckError> {
    check_ops_with_initial(ops, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::subroutine::SubroutineId;

    #[test]
    fn test_simple_ops() {
        let ops = vec![Op::PushInt(1), Op::PushInt(2), Op::Add];
        assert!(check_ops(&ops).is_ok());
    }

    #[test]
    fn test_underflow() {
        let ops = vec![Op::Add];
        let result = check_ops(&ops);
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("underflow"));
    }

    #[test]
    fn test_stores_needs_index_and_value() {
        assert!(check_ops(&[Op::PushInt(5), Op::Stores]).is_err());
        assert!(check_ops(&[Op::PushInt(5), Op::PushInt(1), Op::Stores]).is_ok());
        assert!(check_ops(&[Op::PushInt(5), Op::Loads, Op::Store(0)]).is_ok());
    }

    #[test]
    fn test_if_with_jumps_pattern() {
        let ops = vec![
            Op::PushInt(1),
            Op::JumpIfFalse(3),
            Op::PushInt(10),
            Op::Jump(2),
            Op::PushInt(20),
            Op::Return,
        ];
        assert!(check_ops(&ops).is_ok());
    }

    #[test]
    fn test_jump_if_false_underflow() {
        let ops = vec![Op::JumpIfFalse(2)];
        assert!(check_ops(&ops).is_err());
    }

    #[test]
    fn test_initial_height() {
        let prologue = vec![Op::Store(1), Op::Store(0)];
        assert!(check_ops(&prologue).is_err());
        assert!(check_ops_with_initial(&prologue, 2).is_ok());
    }

    #[test]
    fn test_callsub_stops_analysis() {
        let ops = vec![
            Op::PushInt(1),
            Op::CallSub(SubroutineId(0)),
            Op::Add, // This might underflow, but we can't know
        ];
        assert!(check_ops(&ops).is_ok());
    }
}
