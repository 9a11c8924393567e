use thiserror::Error;

use crate::lang::types::ValueType;

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// An invalid slot or variable request, or invalid compile options
    #[error("configuration error: {message}{}", hint_suffix(.hint))]
    Configuration {
        message: String,
        hint: Option<String>,
    },

    /// A value's type does not fit where it is used
    #[error("type error: {message}{}", hint_suffix(.hint))]
    Type {
        message: String,
        hint: Option<String>,
    },

    /// The scratch space has no free slot left
    #[error("allocation error: {message}")]
    Allocation { message: String },

    /// Fragments that cannot be composed the way they were asked to
    #[error("compile error: {message}{}", hint_suffix(.hint))]
    Structure {
        message: String,
        hint: Option<String>,
    },

    /// An instruction that the selected feature level does not provide
    #[error(
        "version error: {message} (requires version {required}, compiling for version {actual})"
    )]
    Version {
        message: String,
        required: u8,
        actual: u8,
    },
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!("\n  hint: {}", h),
        None => String::new(),
    }
}

impl CompileError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        CompileError::Configuration {
            message: msg.into(),
            hint: None,
        }
    }

    pub fn configuration_with_hint(msg: impl Into<String>, hint: impl Into<String>) -> Self {
        CompileError::Configuration {
            message: msg.into(),
            hint: Some(hint.into()),
        }
    }

    /// Fixed slot id outside `[0, capacity)`
    pub fn slot_out_of_range(id: i64, capacity: usize) -> Self {
        CompileError::Configuration {
            message: format!(
                "requested slot id {} must be in the range [0, {})",
                id, capacity
            ),
            hint: None,
        }
    }

    /// Slot index expression that does not produce an integer
    pub fn slot_index_kind(actual: ValueType) -> Self {
        CompileError::Configuration {
            message: format!("slot index expression must be uint64, got {}", actual),
            hint: Some("dynamic slot ids are computed from integer expressions".to_string()),
        }
    }

    pub fn alias_with_slot() -> Self {
        CompileError::Configuration {
            message: "cannot request a slot id for a variable that aliases another".to_string(),
            hint: Some("aliases always share the slot of the variable they refer to".to_string()),
        }
    }

    pub fn nested_alias() -> Self {
        CompileError::Configuration {
            message: "cannot alias a variable that is itself an alias".to_string(),
            hint: Some("alias the original variable instead".to_string()),
        }
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        CompileError::Type {
            message: msg.into(),
            hint: None,
        }
    }

    pub fn type_mismatch(expected: ValueType, actual: ValueType) -> Self {
        CompileError::Type {
            message: format!("expected {}, got {}", expected, actual),
            hint: None,
        }
    }

    pub fn slots_exhausted(capacity: usize) -> Self {
        CompileError::Allocation {
            message: format!("all {} scratch slots are in use", capacity),
        }
    }

    pub fn structure(msg: impl Into<String>) -> Self {
        CompileError::Structure {
            message: msg.into(),
            hint: None,
        }
    }

    /// Linking onto a fragment that ends in an unconditional exit
    pub fn no_exit(context: &str) -> Self {
        CompileError::Structure {
            message: format!("{}: previous fragment never falls through", context),
            hint: Some(
                "code after a return, retsub or err is unreachable and cannot be linked"
                    .to_string(),
            ),
        }
    }

    pub fn foreign_subroutine(name: &str) -> Self {
        CompileError::Structure {
            message: format!("subroutine '{}' was not defined by this compiler", name),
            hint: Some("define every subroutine through the compiler that compiles it".to_string()),
        }
    }

    pub fn recursive_declaration(name: &str) -> Self {
        CompileError::Structure {
            message: format!(
                "subroutine '{}' was asked for its declaration while it is being declared",
                name
            ),
            hint: Some(
                "call the subroutine from its body instead of declaring it there".to_string(),
            ),
        }
    }

    pub fn version_too_low(what: &str, required: u8, actual: u8) -> Self {
        CompileError::Version {
            message: format!("{} is not available", what),
            required,
            actual,
        }
    }
}
