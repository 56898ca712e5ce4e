use std::sync::Arc;

use crate::result::GrowthPolicy;

/// Statement and descriptor tables grow by this many slots.
pub const STMT_INCREMENT: usize = 16;

/// Index-stable table of shared handles. Freed slots become `None` and are
/// reused before the table grows; the slot count never shrinks until released.
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Option<Arc<T>>>,
    policy: GrowthPolicy,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self { Self::new(GrowthPolicy::Increment { step: STMT_INCREMENT }) }
}

impl<T> HandleTable<T> {
    pub fn new(policy: GrowthPolicy) -> Self { Self { slots: Vec::new(), policy } }

    pub fn capacity(&self) -> usize { self.slots.len() }

    pub fn live(&self) -> usize { self.slots.iter().filter(|s| s.is_some()).count() }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> { self.slots.iter().flatten() }

    pub fn get(&self, slot: usize) -> Option<&Arc<T>> { self.slots.get(slot).and_then(Option::as_ref) }

    pub fn position(&self, handle: &Arc<T>) -> Option<usize> {
        self.slots.iter().position(|s| s.as_ref().is_some_and(|h| Arc::ptr_eq(h, handle)))
    }

    /// Store `handle` in the first free slot, growing when none is left.
    pub fn insert(&mut self, handle: Arc<T>) -> usize {
        if let Some(i) = self.slots.iter().position(Option::is_none) {
            self.slots[i] = Some(handle);
            return i;
        }
        let i = self.slots.len();
        let target = self.policy.next_allocation(i, i + 1);
        self.slots.resize_with(target, || None);
        self.slots[i] = Some(handle);
        i
    }

    pub fn remove(&mut self, handle: &Arc<T>) -> bool {
        match self.position(handle) {
            Some(i) => { self.slots[i] = None; true }
            None => false,
        }
    }

    /// Empty every slot, keeping the slot count.
    pub fn take_all(&mut self) -> Vec<Arc<T>> { self.slots.iter_mut().filter_map(Option::take).collect() }

    /// Empty the table and drop the slots themselves.
    pub fn release(&mut self) -> Vec<Arc<T>> {
        let live = self.take_all();
        self.slots = Vec::new();
        live
    }
}
