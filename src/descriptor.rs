//! Descriptor handles: per-column records describing application buffers or
//! implementation rows/parameters, owned by a connection's descriptor table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::result::ColumnInfo;

static DESC_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DescriptorKind {
    AppRow,
    AppParam,
    ImpRow,
    ImpParam,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescRecord {
    pub name: String,
    pub type_oid: i32,
    pub octet_length: i32,
    pub nullable: bool,
}

#[derive(Debug)]
pub struct Descriptor {
    id: u64,
    kind: DescriptorKind,
    conn: Mutex<Option<Weak<Connection>>>,
    records: Mutex<Vec<DescRecord>>,
}

impl Descriptor {
    pub fn new(kind: DescriptorKind) -> Arc<Descriptor> {
        Arc::new(Descriptor {
            id: DESC_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            kind,
            conn: Mutex::new(None),
            records: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> u64 { self.id }
    pub fn kind(&self) -> DescriptorKind { self.kind }

    pub fn connection(&self) -> Option<Arc<Connection>> { self.conn.lock().as_ref().and_then(Weak::upgrade) }
    pub(crate) fn attach(&self, conn: Weak<Connection>) { *self.conn.lock() = Some(conn); }
    pub(crate) fn detach(&self) { *self.conn.lock() = None; }

    /// Set record `index` (0-based), growing the record list as needed.
    pub fn set_record(&self, index: usize, rec: DescRecord) {
        let mut recs = self.records.lock();
        if recs.len() <= index { recs.resize_with(index + 1, DescRecord::default); }
        recs[index] = rec;
    }

    pub fn record(&self, index: usize) -> Option<DescRecord> { self.records.lock().get(index).cloned() }
    pub fn count(&self) -> usize { self.records.lock().len() }
    pub fn clear(&self) { self.records.lock().clear(); }

    /// Describe the visible columns of a result.
    pub fn fill_from_columns(&self, columns: &ColumnInfo, visible: usize) {
        let recs = columns.iter().take(visible).map(|f| DescRecord {
            name: f.name.clone(),
            type_oid: f.type_oid,
            octet_length: f.display_size.max(f.size as i32),
            nullable: true,
        }).collect();
        *self.records.lock() = recs;
    }
}
