use crate::bytecode::compile_error::CompileError;

/// Number of scratch slots on the target machine.
pub const NUM_SLOTS: usize = 256;

/// Lowest feature level the compiler can target.
pub const MIN_VERSION: u8 = 2;

/// Highest feature level the compiler knows about.
pub const MAX_VERSION: u8 = 5;

/// Options for a single compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Feature level of the target machine. Gates `callsub` and the
    /// computed-index scratch instructions.
    pub version: u8,

    /// Scratch space capacity. Fixed and pool slot ids live in `[0, num_slots)`.
    pub num_slots: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            version: MAX_VERSION,
            num_slots: NUM_SLOTS,
        }
    }
}

impl CompileOptions {
    pub fn with_version(version: u8) -> Self {
        CompileOptions {
            version,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), CompileError> {
        if !(MIN_VERSION..=MAX_VERSION).contains(&self.version) {
            return Err(CompileError::configuration_with_hint(
                format!("unsupported version {}", self.version),
                format!("supported versions are {} to {}", MIN_VERSION, MAX_VERSION),
            ));
        }

        if self.num_slots == 0 {
            return Err(CompileError::configuration(
                "scratch space must have at least one slot",
            ));
        }

        Ok(())
    }
}
