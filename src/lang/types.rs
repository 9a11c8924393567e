use crate::bytecode::compile_error::CompileError;

/// The type an expression leaves on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 64-bit unsigned integer.
    Uint64,

    /// Byte string.
    Bytes,

    /// Either of the value types; checked at run time only.
    Any,

    /// Leaves nothing on the stack.
    None,
}

impl ValueType {
    /// Whether a value of type `actual` may be used where `self` is required.
    pub fn accepts(self, actual: ValueType) -> bool {
        match (self, actual) {
            (expected, actual) if expected == actual => true,
            (ValueType::None, _) | (_, ValueType::None) => false,
            (ValueType::Any, _) | (_, ValueType::Any) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Uint64 => "uint64",
            ValueType::Bytes => "bytes",
            ValueType::Any => "any",
            ValueType::None => "none",
        };
        write!(f, "{}", name)
    }
}

pub fn require_type(actual: ValueType, expected: ValueType) -> Result<(), CompileError> {
    if expected.accepts(actual) {
        Ok(())
    } else {
        Err(CompileError::type_mismatch(expected, actual))
    }
}
