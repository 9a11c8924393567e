#[derive(Debug)]
pub struct RuntimeError {
    pub message: String,
    pub call_stack: Vec<String>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.message)?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl RuntimeError {
    pub fn new(msg: &str) -> Self {
        RuntimeError {
            message: msg.to_string(),
            call_stack: Vec::new(),
        }
    }

    /// Record a frame the error passed through, innermost first.
    pub fn with_context(mut self, context: &str) -> Self {
        self.call_stack.push(context.to_string());
        self
    }
}

pub fn stack_underflow(needed: usize, available: usize) -> RuntimeError {
    RuntimeError::new(&format!(
        "stack underflow: needed {} value(s), stack has {}",
        needed, available
    ))
}

pub fn type_error(expected: &str, got: &str) -> RuntimeError {
    RuntimeError::new(&format!("type error: expected {}, got {}", expected, got))
}

pub fn division_by_zero() -> RuntimeError {
    RuntimeError::new("division by zero")
}

pub fn slot_out_of_range(index: u64, num_slots: usize) -> RuntimeError {
    RuntimeError::new(&format!(
        "scratch slot {} out of range (machine has {} slots)",
        index, num_slots
    ))
}
