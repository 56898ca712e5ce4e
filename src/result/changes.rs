//! Pending changes made through an updatable result before they are synced.

use super::fields::TupleField;
use super::tuples::KeySet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOp {
    Added,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackEntry {
    pub index: usize,
    pub op: RollbackOp,
    pub key: KeySet,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeBuffers {
    pub added_keys: Vec<KeySet>,
    pub added_tuples: Vec<Vec<TupleField>>,
    pub updated: Vec<usize>,
    pub updated_keys: Vec<KeySet>,
    pub updated_tuples: Vec<Vec<TupleField>>,
    pub deleted: Vec<usize>,
    pub deleted_keys: Vec<KeySet>,
    pub rollback: Vec<RollbackEntry>,
}

impl ChangeBuffers {
    pub fn added_count(&self) -> usize { self.added_keys.len() }
    pub fn updated_count(&self) -> usize { self.updated.len() }
    pub fn deleted_count(&self) -> usize { self.deleted.len() }
    pub fn rollback_count(&self) -> usize { self.rollback.len() }

    pub fn is_empty(&self) -> bool {
        self.added_keys.is_empty() && self.updated.is_empty() && self.deleted.is_empty() && self.rollback.is_empty()
    }

    /// Drop every buffer together with its allocation.
    pub fn release(&mut self) { *self = Self::default(); }
}
