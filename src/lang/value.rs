use serde::{Deserialize, Serialize};

/// Runtime value on the machine stack or in a scratch slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit unsigned integer.
    Uint(u64),

    /// Byte string.
    Bytes(Vec<u8>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Uint(_) => "uint64",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Uint(0)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Uint(n) => write!(f, "{}", n),
            Value::Bytes(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}
