use std::rc::Rc;

use log::debug;

use crate::bytecode::block::Fragment;
use crate::bytecode::compile::Compiler;
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::Op;
use crate::lang::expr::{Expr, ret, ret_none, seq};
use crate::lang::scratch_var::ScratchVar;
use crate::lang::subroutine::{Arg, ParamMode, Subroutine};
use crate::lang::types::{ValueType, require_type};

/// The one-time lowered body of a subroutine.
#[derive(Debug)]
pub struct Declaration {
    pub subroutine: Subroutine,

    /// Body as returned by the host, without the argument prologue
    pub body: Expr,

    /// Prologue plus body, ready to be laid out as its own code object
    pub fragment: Fragment,

    /// One variable per parameter, in declaration order. For a by-reference
    /// parameter it holds the caller's slot index.
    pub arg_vars: Vec<ScratchVar>,
}

impl Declaration {
    pub fn name(&self) -> &str {
        self.subroutine.name()
    }

    pub fn value_type(&self) -> ValueType {
        self.body.value_type()
    }

    pub fn always_returns(&self) -> bool {
        self.body.always_returns()
    }
}

#[derive(Debug)]
pub(crate) enum DeclState {
    Declaring,
    Declared(Rc<Declaration>),
}

impl Compiler {
    /// Declare `sub`: build and lower its body once, and cache the result.
    ///
    /// Calling this again returns the cached declaration. Asking for a
    /// declaration from inside its own body is an error; calling the
    /// subroutine from its body is not.
    pub fn declare(&mut self, sub: &Subroutine) -> Result<Rc<Declaration>, CompileError> {
        self.check_defined_here(sub)?;

        match self.declarations.get(&sub.id()) {
            Some(DeclState::Declared(decl)) => return Ok(Rc::clone(decl)),
            Some(DeclState::Declaring) => {
                return Err(CompileError::recursive_declaration(sub.name()));
            }
            None => {}
        }

        self.declarations.insert(sub.id(), DeclState::Declaring);

        match self.build_declaration(sub) {
            Ok(decl) => {
                let decl = Rc::new(decl);
                self.declarations
                    .insert(sub.id(), DeclState::Declared(Rc::clone(&decl)));
                debug!(
                    "declared {} '{}' with {} parameter(s)",
                    sub.id(),
                    sub.name(),
                    sub.arity()
                );
                Ok(decl)
            }
            Err(e) => {
                self.declarations.remove(&sub.id());
                Err(e)
            }
        }
    }

    fn build_declaration(&mut self, sub: &Subroutine) -> Result<Declaration, CompileError> {
        let mut arg_vars = Vec::with_capacity(sub.arity());
        let mut handles = Vec::with_capacity(sub.arity());

        for param in sub.params() {
            match param.mode {
                ParamMode::ByValue => {
                    let var = self.new_var(param.ty)?;
                    handles.push(Arg::Value(var.load()));
                    arg_vars.push(var);
                }
                ParamMode::ByRef => {
                    // holds the caller's slot index; the handle reads and
                    // writes through it
                    let index = self.new_var(ValueType::Uint64)?;
                    let target = self.var_dynamic(param.ty, index.load())?;
                    handles.push(Arg::Var(self.alias(&target)?));
                    arg_vars.push(index);
                }
            }
        }

        let body = sub.build_body(self, &handles)?;

        let declared = sub.return_type();
        if !body.always_returns() {
            require_type(body.value_type(), declared).map_err(|_| CompileError::Type {
                message: format!(
                    "body of subroutine '{}' leaves {}, declared {}",
                    sub.name(),
                    body.value_type(),
                    declared
                ),
                hint: Some("end the body with an explicit return".to_string()),
            })?;
        }

        let tail = if body.always_returns() {
            body.clone()
        } else if declared == ValueType::None {
            seq(vec![body.clone(), ret_none()])
        } else {
            ret(body.clone())
        };

        // the caller pushes arguments left to right, so the last one is on top
        let mut items = arg_vars
            .iter()
            .rev()
            .map(|var| var.stack_store())
            .collect::<Result<Vec<_>, _>>()?;
        items.push(tail);

        let previous = self.current.replace(sub.clone());
        let lowered = self.lower(&seq(items));
        self.current = previous;

        Ok(Declaration {
            subroutine: sub.clone(),
            body,
            fragment: lowered?,
            arg_vars,
        })
    }

    /// Push every argument, then `callsub`. A by-reference argument pushes
    /// its variable's slot index instead of its value.
    pub(super) fn lower_call(
        &mut self,
        sub: &Subroutine,
        args: &[Arg],
    ) -> Result<Fragment, CompileError> {
        self.check_defined_here(sub)?;
        sub.check_args(args)?;
        let op = Op::CallSub(sub.id());
        self.require_version(&op)?;

        let mut children = Vec::with_capacity(args.len());
        for arg in args {
            let frag = match arg {
                Arg::Value(e) => self.lower(e)?,
                Arg::Var(v) => self.lower(&v.index())?,
            };
            children.push(frag);
        }

        self.enqueue(sub);
        self.emit(op, children)
    }

    fn enqueue(&mut self, sub: &Subroutine) {
        if self.declarations.contains_key(&sub.id()) || self.pending.contains(sub) {
            return;
        }
        self.pending.push_back(sub.clone());
    }

    fn check_defined_here(&self, sub: &Subroutine) -> Result<(), CompileError> {
        match self.definitions.get(&sub.id()) {
            Some(own) if own.same_definition(sub) => Ok(()),
            _ => Err(CompileError::foreign_subroutine(sub.name())),
        }
    }
}
