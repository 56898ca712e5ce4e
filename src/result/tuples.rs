//! Growable row and keyset stores.

use serde::{Deserialize, Serialize};

/// Rows allocated the first time a cursor-less cache grows.
pub const TUPLE_MALLOC_INC: usize = 100;

/// How a store grows once `needed` exceeds what is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthPolicy {
    /// First allocation is `max(needed, initial)`, afterwards the allocation doubles until it fits.
    Doubling { initial: usize },
    /// Allocate exactly what was asked for. Used by cursor-bound caches.
    Exact,
    /// Grow in fixed steps. Used by the handle tables.
    Increment { step: usize },
}

impl GrowthPolicy {
    pub fn for_cursor(bound: bool) -> Self {
        if bound { GrowthPolicy::Exact } else { GrowthPolicy::Doubling { initial: TUPLE_MALLOC_INC } }
    }

    /// New allocation for a store holding `allocated` slots that must hold `needed`.
    pub fn next_allocation(self, allocated: usize, needed: usize) -> usize {
        if needed <= allocated { return allocated; }
        match self {
            GrowthPolicy::Exact => needed,
            GrowthPolicy::Increment { step } => {
                let step = step.max(1);
                allocated + (needed - allocated).div_ceil(step) * step
            }
            GrowthPolicy::Doubling { initial } => {
                if allocated == 0 { return needed.max(initial.max(1)); }
                let mut alloc = allocated;
                while alloc < needed { alloc *= 2; }
                alloc
            }
        }
    }
}

/// A vector whose logical allocation is tracked explicitly. `allocated` never
/// shrinks except through [`GrowVec::release`], and `grow_events` counts every
/// reallocation so callers can reason about growth cost.
#[derive(Debug, Clone)]
pub struct GrowVec<T> {
    items: Vec<T>,
    allocated: usize,
    grow_events: usize,
}

impl<T> Default for GrowVec<T> {
    fn default() -> Self { Self { items: Vec::new(), allocated: 0, grow_events: 0 } }
}

impl<T> GrowVec<T> {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn allocated(&self) -> usize { self.allocated }
    pub fn grow_events(&self) -> usize { self.grow_events }
    pub fn get(&self, i: usize) -> Option<&T> { self.items.get(i) }
    pub fn get_mut(&mut self, i: usize) -> Option<&mut T> { self.items.get_mut(i) }
    pub fn iter(&self) -> std::slice::Iter<'_, T> { self.items.iter() }
    pub fn as_slice(&self) -> &[T] { &self.items }

    /// Make room for `needed` items in total.
    pub fn reserve_total(&mut self, needed: usize, policy: GrowthPolicy) {
        let target = policy.next_allocation(self.allocated, needed);
        if target == self.allocated { return; }
        self.items.reserve_exact(target - self.items.len());
        self.allocated = target;
        self.grow_events += 1;
    }

    pub fn push(&mut self, item: T, policy: GrowthPolicy) -> usize {
        self.reserve_total(self.items.len() + 1, policy);
        self.items.push(item);
        self.items.len() - 1
    }

    pub fn pop(&mut self) -> Option<T> { self.items.pop() }

    /// Drop the items but keep the allocation for the next fetch window.
    pub fn clear(&mut self) { self.items.clear(); }

    pub fn truncate(&mut self, len: usize) { self.items.truncate(len); }

    /// Drop the items and the allocation.
    pub fn release(&mut self) {
        self.items = Vec::new();
        self.allocated = 0;
    }
}

/// Physical identity of a row: `(block, offset)` tuple id plus object id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    pub status: u16,
    pub block: u32,
    pub offset: u16,
    pub oid: u32,
}

impl KeySet {
    /// Parse a `(block,offset)` tuple id. Unparseable parts are left at zero.
    pub fn set_tid(&mut self, text: &str) {
        let inner = text.trim().trim_start_matches('(').trim_end_matches(')');
        let mut parts = inner.splitn(2, ',');
        self.block = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
        self.offset = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    }

    /// Parse a decimal object id, stopping at the first non-digit.
    pub fn set_oid(&mut self, text: &str) {
        let digits: String = text.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
        self.oid = digits.parse().unwrap_or(0);
    }
}
