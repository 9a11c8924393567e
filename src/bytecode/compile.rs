use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use log::debug;

use crate::bytecode::block::{BlockGraph, Fragment};
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::layout;
use crate::bytecode::subroutine::{DeclState, Declaration};
use crate::bytecode::{Op, ProgramBc};
use crate::config::CompileOptions;
use crate::lang::expr::{Expr, ExprKind};
use crate::lang::scratch::{SlotRegistry, SlotRequest};
use crate::lang::scratch_var::ScratchVar;
use crate::lang::subroutine::{Arg, Param, Subroutine, SubroutineId};
use crate::lang::types::{ValueType, require_type};

/// Compilation context.
///
/// Owns every piece of mutable state one compilation needs: the slot
/// registry, the block arena and the subroutine declaration cache. Nothing
/// is shared between two compilers.
pub struct Compiler {
    pub(super) options: CompileOptions,

    pub(super) slots: SlotRegistry,

    /// Arena for every block lowered in this compilation
    pub(super) graph: BlockGraph,

    /// Definitions created through this compiler, by id
    pub(super) definitions: BTreeMap<SubroutineId, Subroutine>,

    pub(super) declarations: HashMap<SubroutineId, DeclState>,

    /// Called subroutines still waiting for their declaration
    pub(super) pending: VecDeque<Subroutine>,

    /// Subroutine whose body is being lowered, `None` for the main program
    pub(super) current: Option<Subroutine>,

    next_subroutine: u32,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let options = CompileOptions::default();
        Self {
            slots: SlotRegistry::new(options.num_slots),
            options,
            graph: BlockGraph::new(),
            definitions: BTreeMap::new(),
            declarations: HashMap::new(),
            pending: VecDeque::new(),
            current: None,
            next_subroutine: 0,
        }
    }

    pub fn with_options(options: CompileOptions) -> Result<Self, CompileError> {
        options.validate()?;
        Ok(Self {
            slots: SlotRegistry::new(options.num_slots),
            options,
            ..Self::new()
        })
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn graph(&self) -> &BlockGraph {
        &self.graph
    }

    // =========================================================================
    // Variables
    // =========================================================================

    /// Create a scratch variable.
    ///
    /// With `alias_of`, the new variable shares the target's slot and
    /// `request` must be [`SlotRequest::Pool`].
    pub fn scratch_var(
        &mut self,
        ty: ValueType,
        request: SlotRequest,
        alias_of: Option<&ScratchVar>,
    ) -> Result<ScratchVar, CompileError> {
        match alias_of {
            Some(target) => {
                if request != SlotRequest::Pool {
                    return Err(CompileError::alias_with_slot());
                }
                if target.is_alias() {
                    return Err(CompileError::nested_alias());
                }
                let slot = self.slots.fresh_alias(target.slot());
                Ok(ScratchVar::aliasing(ty, slot, target))
            }
            None => {
                let slot = self.slots.fresh(request)?;
                Ok(ScratchVar::owned(ty, slot))
            }
        }
    }

    pub fn new_var(&mut self, ty: ValueType) -> Result<ScratchVar, CompileError> {
        self.scratch_var(ty, SlotRequest::Pool, None)
    }

    pub fn var_at(&mut self, ty: ValueType, id: i64) -> Result<ScratchVar, CompileError> {
        self.scratch_var(ty, SlotRequest::Fixed(id), None)
    }

    pub fn var_dynamic(&mut self, ty: ValueType, index: Expr) -> Result<ScratchVar, CompileError> {
        self.scratch_var(ty, SlotRequest::Dynamic(index), None)
    }

    /// A variable that reads and writes `target`'s storage.
    pub fn alias(&mut self, target: &ScratchVar) -> Result<ScratchVar, CompileError> {
        self.scratch_var(target.storage_type(), SlotRequest::Pool, Some(target))
    }

    // =========================================================================
    // Subroutines
    // =========================================================================

    /// Define a subroutine. The body is built lazily, the first time the
    /// subroutine is declared.
    pub fn subroutine<F>(
        &mut self,
        name: impl Into<String>,
        params: Vec<Param>,
        return_type: ValueType,
        body: F,
    ) -> Subroutine
    where
        F: Fn(&mut Compiler, &Subroutine, &[Arg]) -> Result<Expr, CompileError> + 'static,
    {
        let id = SubroutineId(self.next_subroutine);
        self.next_subroutine += 1;

        let sub = Subroutine::new(id, name.into(), params, return_type, Box::new(body));
        debug!("defined {} '{}'", id, sub.name());
        self.definitions.insert(id, sub.clone());
        sub
    }

    /// Look a definition up by name. Useful for mutually recursive bodies,
    /// which run after every definition exists.
    pub fn lookup(&self, name: &str) -> Option<Subroutine> {
        self.definitions
            .values()
            .find(|sub| sub.name() == name)
            .cloned()
    }

    // =========================================================================
    // Lowering
    // =========================================================================

    /// Lower `expr` into a fragment of this compiler's block graph.
    pub fn lower(&mut self, expr: &Expr) -> Result<Fragment, CompileError> {
        match expr.kind() {
            ExprKind::Int(n) => Ok(self.graph.fragment(vec![Op::PushInt(*n)])),
            ExprKind::Bytes(b) => Ok(self.graph.fragment(vec![Op::PushBytes(b.clone())])),
            ExprKind::Op { op, args, .. } => {
                let children = self.lower_all(args)?;
                self.emit(op.clone(), children)
            }
            ExprKind::Seq(items) => self.lower_seq(items),
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => self.lower_if(cond, then, otherwise.as_ref()),
            ExprKind::Return(value) => self.lower_return(value.as_ref()),
            ExprKind::Call { subroutine, args } => self.lower_call(subroutine, args),
        }
    }

    pub(super) fn lower_all(&mut self, exprs: &[Expr]) -> Result<Vec<Fragment>, CompileError> {
        exprs.iter().map(|e| self.lower(e)).collect()
    }

    pub(super) fn require_version(&self, op: &Op) -> Result<(), CompileError> {
        let required = op.min_version();
        if required > self.options.version {
            return Err(CompileError::version_too_low(
                op.mnemonic(),
                required,
                self.options.version,
            ));
        }
        Ok(())
    }

    /// Append `op` after `children`, checking it exists at the selected version.
    pub(super) fn emit(&mut self, op: Op, children: Vec<Fragment>) -> Result<Fragment, CompileError> {
        self.require_version(&op)?;
        self.graph.with_op(op, children)
    }

    fn lower_seq(&mut self, items: &[Expr]) -> Result<Fragment, CompileError> {
        let Some((_, init)) = items.split_last() else {
            return Ok(self.graph.fragment(vec![]));
        };

        for (i, item) in init.iter().enumerate() {
            let ty = item.value_type();
            if ty != ValueType::None {
                return Err(CompileError::Type {
                    message: format!(
                        "sequence element {} leaves a {} on the stack: {}",
                        i, ty, item
                    ),
                    hint: Some("only the last element may produce a value; pop() the rest".to_string()),
                });
            }
        }

        let mut frag = self.lower(&items[0])?;
        for item in &items[1..] {
            let next = self.lower(item)?;
            frag = self.graph.seq(frag, next)?;
        }
        Ok(frag)
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then: &Expr,
        otherwise: Option<&Expr>,
    ) -> Result<Fragment, CompileError> {
        require_type(cond.value_type(), ValueType::Uint64)?;

        match otherwise {
            Some(otherwise) if !then.always_returns() && !otherwise.always_returns() => {
                let (t, o) = (then.value_type(), otherwise.value_type());
                if !t.accepts(o) && !o.accepts(t) {
                    return Err(CompileError::type_error(format!(
                        "if branches disagree: then is {}, else is {}",
                        t, o
                    )));
                }
            }
            Some(_) => {}
            None => {
                if then.value_type() != ValueType::None {
                    return Err(CompileError::Type {
                        message: format!(
                            "if without else cannot leave a value, then branch is {}",
                            then.value_type()
                        ),
                        hint: Some("add an else branch or pop() the value".to_string()),
                    });
                }
            }
        }

        let c = self.lower(cond)?;
        let cond_end = c.exit.ok_or_else(|| CompileError::no_exit("if condition"))?;

        let t = self.lower(then)?;
        let join = self.graph.add_block(vec![]);
        if let Some(end) = t.exit {
            self.graph.link(end, join)?;
        }

        let else_entry = match otherwise {
            Some(otherwise) => {
                let o = self.lower(otherwise)?;
                if let Some(end) = o.exit {
                    self.graph.link(end, join)?;
                }
                o.entry
            }
            None => join,
        };

        self.graph.branch(cond_end, vec![t.entry, else_entry])?;

        let returns = then.always_returns() && otherwise.is_some_and(|o| o.always_returns());
        Ok(Fragment {
            entry: c.entry,
            exit: if returns { None } else { Some(join) },
        })
    }

    fn lower_return(&mut self, value: Option<&Expr>) -> Result<Fragment, CompileError> {
        match self.current.clone() {
            None => {
                let value = value.ok_or_else(|| CompileError::Type {
                    message: "the program must return a value".to_string(),
                    hint: Some("return an integer exit code".to_string()),
                })?;
                require_type(value.value_type(), ValueType::Uint64)?;
                let v = self.lower(value)?;
                self.emit(Op::Return, vec![v])
            }
            Some(sub) => {
                let declared = sub.return_type();
                match value {
                    None if declared == ValueType::None => self.emit(Op::RetSub, vec![]),
                    None => Err(CompileError::type_error(format!(
                        "subroutine '{}' must return a {}",
                        sub.name(),
                        declared
                    ))),
                    Some(value) if declared == ValueType::None => {
                        Err(CompileError::type_error(format!(
                            "subroutine '{}' returns no value, got {}",
                            sub.name(),
                            value
                        )))
                    }
                    Some(value) => {
                        require_type(value.value_type(), declared)?;
                        let v = self.lower(value)?;
                        self.emit(Op::RetSub, vec![v])
                    }
                }
            }
        }
    }

    // =========================================================================
    // Driver
    // =========================================================================

    /// Lower the main program, then declare every subroutine it reaches.
    pub fn compile(mut self, root: &Expr) -> Result<Compilation, CompileError> {
        self.current = None;
        let main = self.lower(root)?;

        while let Some(sub) = self.pending.pop_front() {
            self.declare(&sub)?;
        }

        let subroutines: Vec<Rc<Declaration>> = self
            .definitions
            .keys()
            .filter_map(|id| match self.declarations.get(id) {
                Some(DeclState::Declared(decl)) => Some(Rc::clone(decl)),
                _ => None,
            })
            .collect();

        debug!(
            "compiled main and {} subroutine(s) into {} blocks, {} scratch slots used",
            subroutines.len(),
            self.graph.len(),
            self.slots.used()
        );

        Ok(Compilation {
            graph: self.graph,
            main,
            subroutines,
            options: self.options,
        })
    }
}

// =============================================================================
// Result
// =============================================================================

/// A finished block graph: the main fragment plus one declaration per
/// reachable subroutine, ordered by id.
#[derive(Debug)]
pub struct Compilation {
    pub graph: BlockGraph,
    pub main: Fragment,
    pub subroutines: Vec<Rc<Declaration>>,
    pub options: CompileOptions,
}

impl Compilation {
    pub fn declaration(&self, id: SubroutineId) -> Option<&Rc<Declaration>> {
        self.subroutines.iter().find(|d| d.subroutine.id() == id)
    }

    /// Every op reachable from the main entry. Does not include subroutines.
    pub fn main_ops(&self) -> Vec<Op> {
        self.graph.flatten(self.main.entry)
    }

    /// Lay the graph out into a linear program.
    pub fn assemble(&self) -> Result<ProgramBc, CompileError> {
        layout::assemble(self)
    }
}
