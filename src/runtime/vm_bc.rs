use crate::bytecode::ProgramBc;
use crate::bytecode::op::Op;
use crate::bytecode::stack_check_error::check_ops;
use crate::config::NUM_SLOTS;
use crate::lang::value::Value;
use crate::runtime::runtime_error::{
    RuntimeError, division_by_zero, slot_out_of_range, stack_underflow, type_error,
};

#[derive(Debug, Clone)]
pub struct VmBcConfig {
    pub max_call_depth: usize,
    pub max_steps: Option<usize>,
    pub max_stack_size: usize,
    pub num_slots: usize,
}

impl Default for VmBcConfig {
    fn default() -> Self {
        VmBcConfig {
            max_call_depth: 1000,
            max_steps: None,
            max_stack_size: 10_000,
            num_slots: NUM_SLOTS,
        }
    }
}

/// How a code object stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Ran past its last op
    Done,
    /// Hit `retsub`
    RetSub,
    /// Hit `return`; the whole program stops
    Halt,
}

/// Reference model of the target machine.
pub struct VmBc {
    stack: Vec<Value>,
    scratch: Vec<Value>,
    // Safety limits
    config: VmBcConfig,
    call_depth: usize,
    steps: usize,
    exit_value: Option<Value>,
}

impl Default for VmBc {
    fn default() -> Self {
        Self::new()
    }
}

impl VmBc {
    pub fn new() -> Self {
        Self::with_config(VmBcConfig::default())
    }

    pub fn with_config(config: VmBcConfig) -> Self {
        Self {
            stack: Vec::new(),
            scratch: vec![Value::default(); config.num_slots],
            config,
            call_depth: 0,
            steps: 0,
            exit_value: None,
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn scratch(&self) -> &[Value] {
        &self.scratch
    }

    /// Value the program exited with: the operand of `return`, or the top of
    /// the stack if main ran to its end.
    pub fn exit_value(&self) -> Option<&Value> {
        self.exit_value.as_ref()
    }

    pub fn reset_execution_state(&mut self) {
        self.steps = 0;
        self.call_depth = 0;
        self.stack.clear();
        self.scratch = vec![Value::default(); self.config.num_slots];
        self.exit_value = None;
    }

    pub fn run_compiled(&mut self, prog: &ProgramBc) -> Result<(), RuntimeError> {
        self.reset_execution_state();

        let main = prog
            .main()
            .ok_or_else(|| RuntimeError::new("bytecode program has no main code object"))?;

        check_ops(&main.ops).map_err(|e| RuntimeError::new(&e.message))?;

        match self.exec_ops(prog, &main.ops, &main.name)? {
            Flow::Halt => {}
            Flow::Done => self.exit_value = self.stack.last().cloned(),
            Flow::RetSub => {
                return Err(RuntimeError::new("retsub outside of a subroutine")
                    .with_context(&main.name));
            }
        }
        Ok(())
    }

    // Execution

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(RuntimeError::new(&format!(
                    "execution step limit exceeded ({})",
                    max
                )));
            }
        }

        if self.stack.len() > self.config.max_stack_size {
            return Err(RuntimeError::new(&format!(
                "stack size limit exceeded ({})",
                self.config.max_stack_size
            )));
        }

        Ok(())
    }

    fn exec_ops(&mut self, prog: &ProgramBc, ops: &[Op], name: &str) -> Result<Flow, RuntimeError> {
        self.call_depth += 1;

        if self.call_depth > self.config.max_call_depth {
            self.call_depth -= 1;
            return Err(RuntimeError::new(&format!(
                "call depth limit exceeded ({}) - possible infinite recursion in '{}'",
                self.config.max_call_depth, name
            )));
        }

        let result = self
            .exec_ops_inner(prog, ops)
            .map_err(|e| e.with_context(name));

        self.call_depth -= 1;
        result
    }

    fn exec_ops_inner(&mut self, prog: &ProgramBc, ops: &[Op]) -> Result<Flow, RuntimeError> {
        let mut ip: usize = 0;

        while ip < ops.len() {
            self.check_limits()?;

            match &ops[ip] {
                // Literals
                Op::PushInt(n) => self.push(Value::Uint(*n)),
                Op::PushBytes(b) => self.push(Value::Bytes(b.clone())),

                // Stack operations
                Op::Pop => {
                    self.pop()?;
                }

                // Arithmetic
                Op::Add => self.binary(|a, b| Ok(a.wrapping_add(b)))?,
                Op::Sub => self.binary(|a, b| Ok(a.wrapping_sub(b)))?,
                Op::Mul => self.binary(|a, b| Ok(a.wrapping_mul(b)))?,
                Op::Div => self.binary(|a, b| a.checked_div(b).ok_or_else(division_by_zero))?,
                Op::Mod => self.binary(|a, b| a.checked_rem(b).ok_or_else(division_by_zero))?,

                // Comparison
                Op::Eq | Op::Ne => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    if a.type_name() != b.type_name() {
                        return Err(type_error(a.type_name(), b.type_name()));
                    }
                    let equal = a == b;
                    let result = if matches!(ops[ip], Op::Eq) { equal } else { !equal };
                    self.push(Value::Uint(result as u64));
                }
                Op::Lt => self.binary(|a, b| Ok((a < b) as u64))?,
                Op::Gt => self.binary(|a, b| Ok((a > b) as u64))?,
                Op::Le => self.binary(|a, b| Ok((a <= b) as u64))?,
                Op::Ge => self.binary(|a, b| Ok((a >= b) as u64))?,

                // Logic
                Op::And => self.binary(|a, b| Ok((a != 0 && b != 0) as u64))?,
                Op::Or => self.binary(|a, b| Ok((a != 0 || b != 0) as u64))?,
                Op::Not => {
                    let a = self.pop_uint()?;
                    self.push(Value::Uint((a == 0) as u64));
                }

                // Scratch space
                Op::Load(slot) => {
                    let value = self.slot(*slot as u64)?.clone();
                    self.push(value);
                }
                Op::Store(slot) => {
                    let value = self.pop()?;
                    *self.slot(*slot as u64)? = value;
                }
                Op::Loads => {
                    let index = self.pop_uint()?;
                    let value = self.slot(index)?.clone();
                    self.push(value);
                }
                Op::Stores => {
                    let value = self.pop()?;
                    let index = self.pop_uint()?;
                    *self.slot(index)? = value;
                }

                // Jump instructions
                Op::Jump(offset) => {
                    ip = Self::jump_target(ip, *offset, ops.len())?;
                    continue;
                }
                Op::JumpIfFalse(offset) => {
                    if self.pop_uint()? == 0 {
                        ip = Self::jump_target(ip, *offset, ops.len())?;
                        continue;
                    }
                }
                Op::Switch(offsets) => {
                    let index = self.pop_uint()?;
                    if let Some(offset) = usize::try_from(index).ok().and_then(|i| offsets.get(i)) {
                        ip = Self::jump_target(ip, *offset, ops.len())?;
                        continue;
                    }
                }

                // Subroutines & termination
                Op::CallSub(id) => {
                    let code = prog.subroutine(*id).ok_or_else(|| {
                        RuntimeError::new(&format!("undefined subroutine: {}", id))
                    })?;
                    match self.exec_ops(prog, &code.ops, &code.name)? {
                        Flow::RetSub => {}
                        Flow::Halt => return Ok(Flow::Halt),
                        Flow::Done => {
                            return Err(RuntimeError::new(&format!(
                                "subroutine '{}' ended without retsub",
                                code.name
                            )));
                        }
                    }
                }
                Op::RetSub => return Ok(Flow::RetSub),
                Op::Return => {
                    self.exit_value = Some(self.pop()?);
                    return Ok(Flow::Halt);
                }
                Op::Err => return Err(RuntimeError::new("err opcode executed")),
            }

            ip += 1;
        }

        Ok(Flow::Done)
    }

    fn jump_target(ip: usize, offset: i32, len: usize) -> Result<usize, RuntimeError> {
        let new_ip = ip as i64 + offset as i64;
        if new_ip < 0 || new_ip as usize > len {
            return Err(RuntimeError::new(&format!(
                "jump out of bounds: ip={}, offset={}, target={}",
                ip, offset, new_ip
            )));
        }
        Ok(new_ip as usize)
    }

    fn slot(&mut self, index: u64) -> Result<&mut Value, RuntimeError> {
        let num_slots = self.scratch.len();
        usize::try_from(index)
            .ok()
            .and_then(|i| self.scratch.get_mut(i))
            .ok_or_else(|| slot_out_of_range(index, num_slots))
    }

    // Stack operations

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| stack_underflow(1, 0))
    }

    fn pop_uint(&mut self) -> Result<u64, RuntimeError> {
        match self.pop()? {
            Value::Uint(n) => Ok(n),
            other => Err(type_error("uint64", other.type_name())),
        }
    }

    fn binary(
        &mut self,
        f: impl FnOnce(u64, u64) -> Result<u64, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        if self.stack.len() < 2 {
            return Err(stack_underflow(2, self.stack.len()));
        }
        let b = self.pop_uint()?;
        let a = self.pop_uint()?;
        self.push(Value::Uint(f(a, b)?));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodeObject;
    use crate::lang::subroutine::SubroutineId;

    // ============================================================
    // Test Helpers
    // ============================================================

    /// Create a simple program from a list of ops
    fn program_from_ops(ops: Vec<Op>) -> ProgramBc {
        let mut prog = ProgramBc::new();
        prog.code[0].ops = ops;
        prog
    }

    /// Create a program with subroutines, numbered from 0
    fn program_with_subroutines(ops: Vec<Op>, subs: Vec<Vec<Op>>) -> ProgramBc {
        let mut prog = program_from_ops(ops);
        for (i, ops) in subs.into_iter().enumerate() {
            prog.subroutines.insert(SubroutineId(i as u32), prog.code.len());
            prog.code.push(CodeObject {
                name: format!("sub{}", i),
                ops,
            });
        }
        prog
    }

    /// Run ops and return the resulting stack
    fn run_ops(ops: Vec<Op>) -> Result<Vec<Value>, RuntimeError> {
        let mut vm = VmBc::new();
        let prog = program_from_ops(ops);
        vm.run_compiled(&prog)?;
        Ok(vm.stack().to_vec())
    }

    /// Assert stack contains expected values
    fn assert_stack(ops: Vec<Op>, expected: Vec<Value>) {
        let stack = run_ops(ops).expect("execution should succeed");
        assert_eq!(stack, expected, "stack mismatch");
    }

    /// Assert execution produces an error containing the given substring
    fn assert_error(ops: Vec<Op>, error_contains: &str) {
        let result = run_ops(ops);
        match result {
            Ok(stack) => panic!(
                "expected error containing '{}', got stack: {:?}",
                error_contains, stack
            ),
            Err(e) => assert!(
                e.message.contains(error_contains),
                "expected error containing '{}', got: {}",
                error_contains,
                e.message
            ),
        }
    }

    #[test]
    fn test_push() {
        assert_stack(
            vec![Op::PushInt(42), Op::PushBytes(vec![1])],
            vec![Value::Uint(42), Value::Bytes(vec![1])],
        );
    }

    #[test]
    fn test_pop() {
        assert_stack(
            vec![Op::PushInt(1), Op::PushInt(2), Op::Pop],
            vec![Value::Uint(1)],
        );
    }

    #[test]
    fn test_arithmetic_wraps() {
        assert_stack(
            vec![Op::PushInt(u64::MAX), Op::PushInt(2), Op::Add],
            vec![Value::Uint(1)],
        );
        assert_stack(
            vec![Op::PushInt(0), Op::PushInt(1), Op::Sub],
            vec![Value::Uint(u64::MAX)],
        );
        assert_stack(
            vec![Op::PushInt(17), Op::PushInt(5), Op::Mod],
            vec![Value::Uint(2)],
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert_error(vec![Op::PushInt(1), Op::PushInt(0), Op::Div], "division by zero");
        assert_error(vec![Op::PushInt(1), Op::PushInt(0), Op::Mod], "division by zero");
    }

    #[test]
    fn test_comparisons() {
        assert_stack(
            vec![
                Op::PushInt(1),
                Op::PushInt(2),
                Op::Lt,
                Op::PushBytes(vec![7]),
                Op::PushBytes(vec![7]),
                Op::Eq,
                Op::PushInt(0),
                Op::Not,
            ],
            vec![Value::Uint(1), Value::Uint(1), Value::Uint(1)],
        );
    }

    #[test]
    fn test_eq_type_mismatch() {
        assert_error(
            vec![Op::PushInt(1), Op::PushBytes(vec![1]), Op::Eq],
            "type error",
        );
    }

    #[test]
    fn test_add_type_error() {
        assert_error(
            vec![Op::PushBytes(vec![1]), Op::PushInt(1), Op::Add],
            "expected uint64, got bytes",
        );
    }

    #[test]
    fn test_store_and_load() {
        assert_stack(
            vec![Op::PushInt(9), Op::Store(3), Op::Load(3), Op::Load(4)],
            vec![Value::Uint(9), Value::Uint(0)],
        );
    }

    #[test]
    fn test_computed_index_scratch() {
        assert_stack(
            vec![
                Op::PushInt(5),
                Op::PushInt(77),
                Op::Stores,
                Op::Load(5),
                Op::PushInt(5),
                Op::Loads,
            ],
            vec![Value::Uint(77), Value::Uint(77)],
        );
    }

    #[test]
    fn test_slot_out_of_range() {
        assert_error(vec![Op::PushInt(256), Op::Loads], "out of range");
    }

    #[test]
    fn test_jumps() {
        assert_stack(
            vec![
                Op::PushInt(0),
                Op::JumpIfFalse(3),
                Op::PushInt(10),
                Op::Jump(2),
                Op::PushInt(20),
            ],
            vec![Value::Uint(20)],
        );
        assert_stack(
            vec![
                Op::PushInt(1),
                Op::JumpIfFalse(3),
                Op::PushInt(10),
                Op::Jump(2),
                Op::PushInt(20),
            ],
            vec![Value::Uint(10)],
        );
    }

    #[test]
    fn test_jump_out_of_bounds() {
        assert_error(vec![Op::Jump(5)], "jump out of bounds");
    }

    #[test]
    fn test_switch() {
        let ops = |selector| {
            vec![
                Op::PushInt(selector),
                Op::Switch(vec![3, 5]),
                Op::PushInt(30),
                Op::Return,
                Op::PushInt(10),
                Op::Return,
                Op::PushInt(20),
                Op::Return,
            ]
        };

        for (selector, expected) in [(0, 10), (1, 20), (2, 30), (u64::MAX, 30)] {
            let mut vm = VmBc::new();
            vm.run_compiled(&program_from_ops(ops(selector))).unwrap();
            assert_eq!(vm.exit_value(), Some(&Value::Uint(expected)));
        }
    }

    #[test]
    fn test_return_sets_exit_value() {
        let mut vm = VmBc::new();
        let prog = program_from_ops(vec![Op::PushInt(3), Op::Return, Op::Err]);
        vm.run_compiled(&prog).unwrap();
        assert_eq!(vm.exit_value(), Some(&Value::Uint(3)));
    }

    #[test]
    fn test_fall_off_main_uses_top_of_stack() {
        let mut vm = VmBc::new();
        vm.run_compiled(&program_from_ops(vec![Op::PushInt(1), Op::PushInt(8)]))
            .unwrap();
        assert_eq!(vm.exit_value(), Some(&Value::Uint(8)));
    }

    #[test]
    fn test_err_fails() {
        assert_error(vec![Op::Err], "err opcode");
    }

    #[test]
    fn test_callsub_retsub() {
        let prog = program_with_subroutines(
            vec![Op::PushInt(20), Op::CallSub(SubroutineId(0)), Op::Return],
            vec![vec![Op::PushInt(22), Op::Add, Op::RetSub]],
        );

        let mut vm = VmBc::new();
        vm.run_compiled(&prog).unwrap();
        assert_eq!(vm.exit_value(), Some(&Value::Uint(42)));
    }

    #[test]
    fn test_return_inside_subroutine_halts() {
        let prog = program_with_subroutines(
            vec![Op::CallSub(SubroutineId(0)), Op::Err],
            vec![vec![Op::PushInt(1), Op::Return]],
        );

        let mut vm = VmBc::new();
        vm.run_compiled(&prog).unwrap();
        assert_eq!(vm.exit_value(), Some(&Value::Uint(1)));
    }

    #[test]
    fn test_subroutine_without_retsub() {
        let prog = program_with_subroutines(
            vec![Op::CallSub(SubroutineId(0))],
            vec![vec![Op::PushInt(1)]],
        );

        let err = VmBc::new().run_compiled(&prog).unwrap_err();
        assert!(err.message.contains("ended without retsub"));
        assert_eq!(err.call_stack, vec!["main".to_string()]);
    }

    #[test]
    fn test_undefined_subroutine() {
        assert_error(vec![Op::CallSub(SubroutineId(9))], "undefined subroutine");
    }

    #[test]
    fn test_error_carries_call_stack() {
        let prog = program_with_subroutines(
            vec![Op::CallSub(SubroutineId(0))],
            vec![vec![Op::Err]],
        );

        let err = VmBc::new().run_compiled(&prog).unwrap_err();
        assert_eq!(err.call_stack, vec!["sub0".to_string(), "main".to_string()]);
    }

    #[test]
    fn test_call_depth_limit() {
        let prog = program_with_subroutines(
            vec![Op::CallSub(SubroutineId(0))],
            vec![vec![Op::CallSub(SubroutineId(0)), Op::RetSub]],
        );
        let config = VmBcConfig {
            max_call_depth: 50,
            ..VmBcConfig::default()
        };

        let err = VmBc::with_config(config).run_compiled(&prog).unwrap_err();
        assert!(err.message.contains("call depth limit exceeded (50)"));
    }

    #[test]
    fn test_step_limit() {
        let config = VmBcConfig {
            max_steps: Some(10),
            ..VmBcConfig::default()
        };
        let prog = program_from_ops(vec![Op::Jump(0)]);

        let err = VmBc::with_config(config).run_compiled(&prog).unwrap_err();
        assert!(err.message.contains("step limit"));
    }

    #[test]
    fn test_stack_check_runs_first() {
        let mut vm = VmBc::new();
        let err = vm
            .run_compiled(&program_from_ops(vec![Op::PushInt(1), Op::Store(0), Op::Pop]))
            .unwrap_err();

        assert!(err.message.contains("stack underflow at ip=2"));
        assert_eq!(vm.scratch()[0], Value::Uint(0));
    }

    #[test]
    fn test_runs_are_independent() {
        let mut vm = VmBc::new();
        vm.run_compiled(&program_from_ops(vec![Op::PushInt(5), Op::Store(0)]))
            .unwrap();
        vm.run_compiled(&program_from_ops(vec![Op::Load(0)])).unwrap();

        assert_eq!(vm.exit_value(), Some(&Value::Uint(0)));
    }
}
