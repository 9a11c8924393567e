use crate::bytecode::Op;
use crate::lang::subroutine::SubroutineId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An assembled program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramBc {
    /// Collection of code objects (instruction streams).
    /// Convention: `code[0]` is always `main`.
    pub code: Vec<CodeObject>,

    /// Subroutine id -> index into `code`
    pub subroutines: BTreeMap<SubroutineId, usize>,
}

impl Default for ProgramBc {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBc {
    pub fn new() -> Self {
        Self {
            code: vec![CodeObject::new("main")],
            subroutines: BTreeMap::new(),
        }
    }

    pub fn main(&self) -> Option<&CodeObject> {
        self.code.first()
    }

    pub fn subroutine(&self, id: SubroutineId) -> Option<&CodeObject> {
        self.subroutines.get(&id).and_then(|i| self.code.get(*i))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// A single compiled instruction stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeObject {
    pub name: String,
    pub ops: Vec<Op>,
}

impl CodeObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ops: Vec::new(),
        }
    }
}
