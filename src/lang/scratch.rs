use std::collections::BTreeSet;

use log::{trace, warn};

use crate::bytecode::compile_error::CompileError;
use crate::lang::expr::Expr;
use crate::lang::types::ValueType;

/// Where a slot's numeric index comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotId {
    /// Known at build time, either requested by the host or drawn from the pool.
    Index(usize),

    /// Computed at run time by an integer expression.
    Dynamic(Expr),
}

/// One scratch storage location.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub id: SlotId,

    /// The id was explicitly requested rather than pool-assigned.
    pub reserved: bool,

    /// The storage belongs to another slot; this one only refers to it.
    pub by_reference: bool,
}

impl Slot {
    /// The numeric id, if it is known at build time.
    pub fn index(&self) -> Option<usize> {
        match &self.id {
            SlotId::Index(i) => Some(*i),
            SlotId::Dynamic(_) => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.id, SlotId::Dynamic(_))
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            SlotId::Index(i) => write!(f, "slot#{}", i)?,
            SlotId::Dynamic(e) => write!(f, "slot#{}", e)?,
        }
        if self.by_reference {
            write!(f, " (by reference)")?;
        }
        Ok(())
    }
}

/// How the host asks for a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotRequest {
    /// Next free id from the pool.
    Pool,

    /// A specific id in `[0, capacity)`.
    Fixed(i64),

    /// An id computed at run time.
    Dynamic(Expr),
}

/// Hands out scratch slots for one compilation.
///
/// Pool ids increase monotonically and skip ids already reserved as fixed.
#[derive(Debug, Clone)]
pub struct SlotRegistry {
    capacity: usize,
    next: usize,
    reserved: BTreeSet<usize>,
    pooled: BTreeSet<usize>,
}

impl SlotRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next: 0,
            reserved: BTreeSet::new(),
            pooled: BTreeSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of ids handed out so far, fixed and pooled.
    pub fn used(&self) -> usize {
        self.reserved.len() + self.pooled.len()
    }

    pub fn fresh(&mut self, request: SlotRequest) -> Result<Slot, CompileError> {
        match request {
            SlotRequest::Pool => self.fresh_pool(),
            SlotRequest::Fixed(id) => self.fresh_fixed(id),
            SlotRequest::Dynamic(index) => self.fresh_dynamic(index),
        }
    }

    pub fn fresh_pool(&mut self) -> Result<Slot, CompileError> {
        let mut candidate = self.next;
        while self.reserved.contains(&candidate) {
            candidate += 1;
        }

        if candidate >= self.capacity {
            return Err(CompileError::slots_exhausted(self.capacity));
        }

        self.next = candidate + 1;
        self.pooled.insert(candidate);
        trace!("pool slot {} assigned", candidate);

        Ok(Slot {
            id: SlotId::Index(candidate),
            reserved: false,
            by_reference: false,
        })
    }

    pub fn fresh_fixed(&mut self, id: i64) -> Result<Slot, CompileError> {
        let index = usize::try_from(id)
            .ok()
            .filter(|i| *i < self.capacity)
            .ok_or_else(|| CompileError::slot_out_of_range(id, self.capacity))?;

        if self.pooled.contains(&index) {
            return Err(CompileError::configuration_with_hint(
                format!("slot {} was already assigned from the pool", index),
                "request fixed slots before declaring pool variables",
            ));
        }

        if !self.reserved.insert(index) {
            warn!("fixed slot {} requested more than once", index);
        }
        trace!("fixed slot {} reserved", index);

        Ok(Slot {
            id: SlotId::Index(index),
            reserved: true,
            by_reference: false,
        })
    }

    /// A slot whose id is computed by `index` at run time. Consumes no capacity.
    pub fn fresh_dynamic(&mut self, index: Expr) -> Result<Slot, CompileError> {
        let ty = index.value_type();
        if !ValueType::Uint64.accepts(ty) {
            return Err(CompileError::slot_index_kind(ty));
        }

        Ok(Slot {
            id: SlotId::Dynamic(index),
            reserved: false,
            by_reference: false,
        })
    }

    /// A slot that shares `target`'s storage. Consumes no capacity.
    pub fn fresh_alias(&self, target: &Slot) -> Slot {
        Slot {
            id: target.id.clone(),
            reserved: target.reserved,
            by_reference: true,
        }
    }

    /// Forget every assignment. Only for starting an independent compilation.
    pub fn reset(&mut self) {
        self.next = 0;
        self.reserved.clear();
        self.pooled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::expr::{bytes, int};

    #[test]
    fn test_pool_ids_strictly_increase() {
        let mut slots = SlotRegistry::new(16);
        let ids: Vec<usize> = (0..10)
            .map(|_| slots.fresh_pool().unwrap().index().unwrap())
            .collect();

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids[0], 0);
    }

    #[test]
    fn test_pool_skips_reserved() {
        let mut slots = SlotRegistry::new(8);
        slots.fresh_fixed(0).unwrap();
        slots.fresh_fixed(2).unwrap();

        let a = slots.fresh_pool().unwrap();
        let b = slots.fresh_pool().unwrap();
        assert_eq!(a.index(), Some(1));
        assert_eq!(b.index(), Some(3));
        assert!(!a.reserved);
    }

    #[test]
    fn test_pool_exhaustion_counts_reserved() {
        let capacity = 6;
        let mut slots = SlotRegistry::new(capacity);
        slots.fresh_fixed(1).unwrap();
        slots.fresh_fixed(4).unwrap();

        for _ in 0..capacity - 2 {
            slots.fresh_pool().unwrap();
        }

        let err = slots.fresh_pool().unwrap_err();
        assert!(matches!(err, CompileError::Allocation { .. }));
        assert_eq!(slots.used(), capacity);
    }

    #[test]
    fn test_fixed_bounds() {
        let mut slots = SlotRegistry::new(256);
        assert!(slots.fresh_fixed(0).is_ok());
        assert!(slots.fresh_fixed(255).is_ok());

        for bad in [-1, 256, i64::MAX, i64::MIN] {
            let err = slots.fresh_fixed(bad).unwrap_err();
            assert!(matches!(err, CompileError::Configuration { .. }));
            assert!(err.to_string().contains("must be in the range"));
        }
    }

    #[test]
    fn test_fixed_marks_reserved() {
        let mut slots = SlotRegistry::new(256);
        let slot = slots.fresh_fixed(42).unwrap();
        assert_eq!(slot.index(), Some(42));
        assert!(slot.reserved);
        assert!(!slot.by_reference);
        assert_eq!(slot.to_string(), "slot#42");
    }

    #[test]
    fn test_fixed_after_pool_conflict() {
        let mut slots = SlotRegistry::new(256);
        slots.fresh_pool().unwrap();

        let err = slots.fresh_fixed(0).unwrap_err();
        assert!(err.to_string().contains("already assigned from the pool"));
    }

    #[test]
    fn test_dynamic_requires_integer_index() {
        let mut slots = SlotRegistry::new(256);

        let slot = slots.fresh_dynamic(int(7)).unwrap();
        assert!(slot.is_dynamic());
        assert_eq!(slot.index(), None);
        assert_eq!(slots.used(), 0);

        let err = slots.fresh_dynamic(bytes("7")).unwrap_err();
        assert!(matches!(err, CompileError::Configuration { .. }));
    }

    #[test]
    fn test_alias_consumes_nothing() {
        let mut slots = SlotRegistry::new(2);
        let target = slots.fresh_pool().unwrap();
        let alias = slots.fresh_alias(&target);

        assert_eq!(alias.id, target.id);
        assert!(alias.by_reference);
        assert_eq!(slots.used(), 1);
        assert!(slots.fresh_pool().is_ok());
    }

    #[test]
    fn test_fresh_dispatches_request() {
        let mut slots = SlotRegistry::new(8);
        assert_eq!(slots.fresh(SlotRequest::Fixed(3)).unwrap().index(), Some(3));
        assert_eq!(slots.fresh(SlotRequest::Pool).unwrap().index(), Some(0));
        assert!(
            slots
                .fresh(SlotRequest::Dynamic(int(1)))
                .unwrap()
                .is_dynamic()
        );
    }

    #[test]
    fn test_reset() {
        let mut slots = SlotRegistry::new(1);
        slots.fresh_pool().unwrap();
        assert!(slots.fresh_pool().is_err());

        slots.reset();
        assert_eq!(slots.fresh_pool().unwrap().index(), Some(0));
    }
}
