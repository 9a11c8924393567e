use std::rc::Rc;

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::Op;
use crate::lang::expr::{Expr, int};
use crate::lang::scratch::{Slot, SlotId};
use crate::lang::types::{ValueType, require_type};

/// An addressable variable in scratch space.
///
/// Variables are created through a [`Compiler`](crate::Compiler), which owns
/// the slot registry. An aliasing variable owns no storage: it shares its
/// target's slot and forwards every access to it through the target's index.
#[derive(Debug, Clone, PartialEq)]
pub struct ScratchVar {
    ty: ValueType,
    slot: Slot,
    alias: Option<Rc<ScratchVar>>,
}

impl ScratchVar {
    pub(crate) fn owned(ty: ValueType, slot: Slot) -> Self {
        Self {
            ty,
            slot,
            alias: None,
        }
    }

    pub(crate) fn aliasing(ty: ValueType, slot: Slot, target: &ScratchVar) -> Self {
        Self {
            ty,
            slot,
            alias: Some(Rc::new(target.clone())),
        }
    }

    /// Type of the values this variable may hold.
    pub fn storage_type(&self) -> ValueType {
        self.ty
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    pub fn is_alias(&self) -> bool {
        self.alias.is_some()
    }

    /// Store `value` in this variable.
    ///
    /// Stack effect of the result: `( -- )`
    pub fn store(&self, value: Expr) -> Result<Expr, CompileError> {
        require_type(value.value_type(), self.ty)?;

        if let Some(target) = &self.alias {
            return Ok(Expr::from_op(
                Op::Stores,
                vec![target.index(), value],
                ValueType::None,
            ));
        }

        Ok(match &self.slot.id {
            SlotId::Index(i) => Expr::from_op(Op::Store(*i), vec![value], ValueType::None),
            SlotId::Dynamic(index) => {
                Expr::from_op(Op::Stores, vec![index.clone(), value], ValueType::None)
            }
        })
    }

    /// Load the value of this variable.
    ///
    /// Stack effect of the result: `( -- x )`
    pub fn load(&self) -> Expr {
        if let Some(target) = &self.alias {
            return target.index().then_op(Op::Loads, self.ty);
        }

        match &self.slot.id {
            SlotId::Index(i) => Expr::from_op(Op::Load(*i), vec![], self.ty),
            SlotId::Dynamic(index) => index.then_op(Op::Loads, self.ty),
        }
    }

    /// An expression evaluating to the numeric id of this variable's storage.
    ///
    /// Passing a variable by reference means passing this value.
    pub fn index(&self) -> Expr {
        if let Some(target) = &self.alias {
            return target.index();
        }

        match &self.slot.id {
            SlotId::Index(i) => int(*i as u64),
            SlotId::Dynamic(index) => index.clone(),
        }
    }

    /// Pop whatever is on top of the stack into this variable.
    ///
    /// Stack effect of the result: `( x -- )`
    pub fn stack_store(&self) -> Result<Expr, CompileError> {
        match (&self.alias, &self.slot.id) {
            (None, SlotId::Index(i)) => Ok(Expr::from_op(Op::Store(*i), vec![], ValueType::None)),
            _ => Err(CompileError::configuration(format!(
                "cannot store the stack top into {}: only fixed or pool slots support it",
                self.slot
            ))),
        }
    }
}
