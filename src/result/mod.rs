//! Query result tuple cache.
//!
//! A [`ResultCache`] holds the decoded rows of one result, the parallel keyset
//! used by updatable results, the pending change buffers and the optional
//! server cursor the rows are fetched through. Follow-on results of a
//! multi-statement batch are owned by the first one as an ordered sequence.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::connection::Connection;
use crate::error::{DriverError, DriverResult};

pub mod changes;
pub mod fields;
pub mod tuples;

pub use changes::{ChangeBuffers, RollbackEntry, RollbackOp};
pub use fields::{ColumnInfo, FieldInfo, TupleField};
pub use tuples::{GrowVec, GrowthPolicy, KeySet, TUPLE_MALLOC_INC};

/// Hidden identity columns (tuple id + object id) appended when keysets are on.
pub const NUM_KEY_FIELDS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    EmptyQuery,
    CommandOk,
    TuplesOk,
    FieldsOk,
    BadResponse,
    NonfatalError,
    FatalError,
    NoMemory,
}

impl ResultStatus {
    pub fn is_error(self) -> bool {
        matches!(self, ResultStatus::BadResponse | ResultStatus::FatalError | ResultStatus::NoMemory)
    }
}

/// Where a consumer stands relative to the cached rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing was ever cached.
    Empty,
    /// Rows remain after the current position.
    Active,
    /// The window is consumed but the cursor can deliver more rows.
    NeedsRefill,
    Exhausted,
    Closed,
}

#[derive(Debug)]
pub struct ResultCache {
    status: ResultStatus,
    message: Option<String>,
    notice: Option<String>,
    command: Option<String>,
    fields: Option<ColumnInfo>,
    num_fields: usize,
    num_key_fields: usize,
    keyset_enabled: bool,
    tuples: GrowVec<Vec<TupleField>>,
    keyset: GrowVec<KeySet>,
    changes: ChangeBuffers,
    cursor_name: Option<String>,
    curs_tuple: i64,
    current_row: i64,
    rowstart: i64,
    window_start: usize,
    num_total_read: usize,
    cache_size: usize,
    rowset_size: usize,
    reached_eof: bool,
    withhold: bool,
    permanent: bool,
    closed: bool,
    conn: Option<Weak<Connection>>,
    next: Vec<ResultCache>,
}

impl Default for ResultCache {
    fn default() -> Self { Self::new() }
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            status: ResultStatus::EmptyQuery,
            message: None,
            notice: None,
            command: None,
            fields: Some(ColumnInfo::default()),
            num_fields: 0,
            num_key_fields: 0,
            keyset_enabled: false,
            tuples: GrowVec::new(),
            keyset: GrowVec::new(),
            changes: ChangeBuffers::default(),
            cursor_name: None,
            curs_tuple: -1,
            current_row: -1,
            rowstart: -1,
            window_start: 0,
            num_total_read: 0,
            cache_size: 0,
            rowset_size: 1,
            reached_eof: false,
            withhold: false,
            permanent: false,
            closed: false,
            conn: None,
            next: Vec::new(),
        }
    }

    /// A result whose cursor bindings are counted on `conn`.
    pub fn for_connection(conn: &Arc<Connection>) -> Self {
        let mut r = Self::new();
        r.conn = Some(Arc::downgrade(conn));
        r
    }

    pub fn set_connection(&mut self, conn: Option<Weak<Connection>>) { self.conn = conn; }

    /// An empty result counting cursors on the same connection.
    pub(crate) fn successor(&self) -> ResultCache {
        let mut r = Self::new();
        r.conn = self.conn.clone();
        r
    }

    // ---- status and text ----

    pub fn status(&self) -> ResultStatus { self.status }
    pub fn set_status(&mut self, status: ResultStatus) { self.status = status; }

    pub fn command(&self) -> Option<&str> { self.command.as_deref() }
    pub fn set_command(&mut self, tag: Option<&str>) { self.command = tag.map(str::to_string); }

    pub fn message(&self) -> Option<&str> { self.message.as_deref() }
    pub fn set_message(&mut self, msg: Option<&str>) { self.message = msg.map(str::to_string); }

    pub fn notice(&self) -> Option<&str> { self.notice.as_deref() }
    pub fn set_notice(&mut self, msg: Option<&str>) { self.notice = msg.map(str::to_string); }

    /// Append to the message, `;`-separated. Empty input is ignored.
    pub fn add_message(&mut self, msg: &str) { append_joined(&mut self.message, msg); }

    pub fn add_notice(&mut self, msg: &str) { append_joined(&mut self.notice, msg); }

    // ---- fields ----

    /// Install the wire column layout. With keysets on, the last two wire
    /// columns are the hidden identity columns. The visible field count is
    /// fixed once defined.
    pub fn define_fields(&mut self, columns: ColumnInfo, keyset: bool) -> DriverResult<()> {
        let key_fields = if keyset { NUM_KEY_FIELDS } else { 0 };
        if columns.len() < key_fields {
            return Err(DriverError::bad_response(format!(
                "result has {} columns, keyset needs {}", columns.len(), key_fields)));
        }
        let visible = columns.len() - key_fields;
        if self.num_fields > 0 && visible != self.num_fields {
            return Err(DriverError::bad_response(format!(
                "field count changed from {} to {}", self.num_fields, visible)));
        }
        self.num_fields = visible;
        self.num_key_fields = key_fields;
        self.keyset_enabled = keyset;
        self.fields = Some(columns);
        if self.status == ResultStatus::EmptyQuery { self.status = ResultStatus::FieldsOk; }
        Ok(())
    }

    pub fn fields(&self) -> Option<&ColumnInfo> { self.fields.as_ref() }
    pub fn fields_mut(&mut self) -> Option<&mut ColumnInfo> { self.fields.as_mut() }
    pub fn num_fields(&self) -> usize { self.num_fields }
    pub fn num_key_fields(&self) -> usize { self.num_key_fields }
    /// Columns present in every wire frame.
    pub fn wire_field_count(&self) -> usize { self.num_fields + self.num_key_fields }
    pub fn has_keyset(&self) -> bool { self.keyset_enabled }

    fn policy(&self) -> GrowthPolicy { GrowthPolicy::for_cursor(self.cursor_name.is_some()) }

    // ---- rows ----

    /// Append a null-filled row (and keyset entry when synchronized) and return its index.
    pub fn append_row(&mut self) -> DriverResult<usize> {
        if self.num_fields == 0 {
            return Err(DriverError::bad_response("cannot add a row to a result without fields"));
        }
        let policy = self.policy();
        let idx = self.tuples.push(vec![TupleField::null(); self.num_fields], policy);
        if self.keyset_enabled { self.keyset.push(KeySet::default(), policy); }
        Ok(idx)
    }

    /// Store a fully decoded row and advance the logical row cursor.
    pub(crate) fn commit_row(&mut self, values: Vec<TupleField>, key: KeySet) -> DriverResult<()> {
        let idx = self.append_row()?;
        if let Some(fields) = self.fields.as_mut() {
            for (col, v) in values.iter().enumerate() {
                if !v.is_null() { fields.note_width(col, v.len()); }
            }
        }
        if let Some(row) = self.tuples.get_mut(idx) {
            for (slot, v) in row.iter_mut().zip(values) { *slot = v; }
        }
        if let Some(k) = self.keyset.get_mut(idx) { *k = key; }
        self.curs_tuple += 1;
        if !self.reached_eof && self.curs_tuple >= self.num_total_read as i64 {
            self.num_total_read = (self.curs_tuple + 1) as usize;
        }
        trace!(target: "qresult", "cached row {} (total read {})", idx, self.num_total_read);
        Ok(())
    }

    /// Grow the row and keyset stores so `add` more rows fit. Returns the row allocation.
    pub fn enlarge_key_cache(&mut self, add: usize) -> usize {
        if add == 0 { return self.tuples.allocated(); }
        let policy = self.policy();
        if self.num_fields > 0 { self.tuples.reserve_total(self.tuples.len() + add, policy); }
        if self.keyset_enabled { self.keyset.reserve_total(self.keyset.len() + add, policy); }
        self.tuples.allocated()
    }

    pub fn row_count(&self) -> usize { self.tuples.len() }
    pub fn num_cached_rows(&self) -> usize { self.tuples.len() }
    pub fn num_cached_keys(&self) -> usize { self.keyset.len() }
    pub fn row_allocation(&self) -> usize { self.tuples.allocated() }
    pub fn key_allocation(&self) -> usize { self.keyset.allocated() }
    pub fn row_grow_events(&self) -> usize { self.tuples.grow_events() }

    /// Drop cached rows past `n`; the keyset follows when synchronized.
    pub fn set_num_cached_rows(&mut self, n: usize) {
        self.tuples.truncate(n);
        if self.keyset_enabled { self.keyset.truncate(n); }
    }

    pub fn row(&self, row: usize) -> Option<&[TupleField]> { self.tuples.get(row).map(Vec::as_slice) }

    pub fn key(&self, row: usize) -> Option<&KeySet> { self.keyset.get(row) }

    /// `(length, bytes, is_null)` for a cell of the cache; null cells report length -1.
    pub fn get_cell(&self, row: usize, col: usize) -> Option<(i32, &[u8], bool)> {
        let f = self.tuples.get(row)?.get(col)?;
        Some((f.len(), f.bytes().unwrap_or(&[]), f.is_null()))
    }

    /// Overwrite one cached cell. False when the cell does not exist.
    pub fn set_cell(&mut self, row: usize, col: usize, value: TupleField) -> bool {
        let Some(slot) = self.tuples.get_mut(row).and_then(|r| r.get_mut(col)) else { return false };
        if let (Some(fields), false) = (self.fields.as_mut(), value.is_null()) { fields.note_width(col, value.len()); }
        *slot = value;
        true
    }

    // ---- positions ----

    /// Position of the decoder: index of the last row read, -1 before the first.
    pub fn curs_tuple(&self) -> i64 { self.curs_tuple }
    pub fn current_row(&self) -> i64 { self.current_row }
    pub fn current_tuple(&self) -> Option<&[TupleField]> {
        if self.current_row < 0 { return None; }
        self.row(self.current_row as usize)
    }

    /// Move the consumer position by `n` rows and report where that leaves it.
    pub fn advance_cursor(&mut self, n: i64) -> CacheState {
        let rows = self.tuples.len() as i64;
        self.current_row = (self.current_row + n).clamp(-1, rows);
        self.state()
    }

    pub fn state(&self) -> CacheState {
        if self.closed { return CacheState::Closed; }
        let rows = self.tuples.len() as i64;
        if self.current_row + 1 < rows { return CacheState::Active; }
        if self.cursor_name.is_some() && !self.reached_eof { return CacheState::NeedsRefill; }
        if rows == 0 && self.window_start == 0 { CacheState::Empty } else { CacheState::Exhausted }
    }

    pub fn is_exhausted(&self) -> bool {
        !matches!(self.state(), CacheState::Active | CacheState::NeedsRefill)
    }

    /// Start the next fetch window: rows go, their allocation stays.
    pub fn begin_window(&mut self) {
        self.window_start += self.tuples.len();
        self.tuples.clear();
        self.keyset.clear();
        self.current_row = -1;
        if self.rowstart >= 0 { self.rowstart = 0; }
    }

    /// Rows consumed by earlier fetch windows.
    pub fn window_start(&self) -> usize { self.window_start }

    pub fn rowstart_in_cache(&self) -> i64 { self.rowstart }
    pub fn set_rowstart_in_cache(&mut self, start: i64) { self.rowstart = start; }
    pub fn inc_rowstart_in_cache(&mut self, inc: i64) {
        if self.rowstart < 0 { debug!(target: "qresult", "rowstart moved while the cache is not ready"); }
        self.rowstart += inc;
    }

    /// Point the consumer at row `pos` of the current rowset.
    pub fn set_position(&mut self, pos: i64) {
        let rows = self.tuples.len() as i64;
        self.current_row = (self.rowstart.max(0) + pos).clamp(-1, rows);
    }

    pub fn cache_size(&self) -> usize { self.cache_size }
    pub fn set_cache_size(&mut self, n: usize) { self.cache_size = n; }
    pub fn rowset_size(&self) -> usize { self.rowset_size }
    pub fn set_rowset_size(&mut self, n: usize) { self.rowset_size = n; }
    pub fn num_total_read(&self) -> usize { self.num_total_read }
    pub fn reached_eof(&self) -> bool { self.reached_eof }
    pub fn set_reached_eof(&mut self) { self.reached_eof = true; }

    // ---- cursor ----

    pub fn cursor_name(&self) -> Option<&str> { self.cursor_name.as_deref() }

    /// Bind (`Some`) or clear (`None`) the server cursor. Binding an already bound
    /// result clears first, so the owning connection's count moves by net zero.
    pub fn set_cursor(&mut self, name: Option<&str>) {
        if self.cursor_name.take().is_some() {
            self.notify_cursor(false);
            self.curs_tuple = -1;
            self.current_row = -1;
        }
        match name {
            Some(n) => {
                self.cursor_name = Some(n.to_string());
                self.notify_cursor(true);
            }
            None => {
                self.reached_eof = false;
                self.withhold = false;
                self.permanent = false;
            }
        }
    }

    /// Declared `with hold`: survives a normal transaction end.
    pub fn is_withhold(&self) -> bool { self.withhold }
    pub fn set_withhold(&mut self, on: bool) { self.withhold = on; }
    /// Known to survive a rollback as well.
    pub fn is_permanent(&self) -> bool { self.permanent }
    pub fn set_permanent(&mut self, on: bool) { self.permanent = on; }

    fn notify_cursor(&self, opened: bool) {
        if let Some(conn) = self.conn.as_ref().and_then(Weak::upgrade) {
            conn.adjust_cursor_count(opened);
        }
    }

    // ---- change buffers ----

    pub fn changes(&self) -> &ChangeBuffers { &self.changes }

    pub fn record_added(&mut self, row: Vec<TupleField>, key: KeySet) {
        self.changes.added_tuples.push(row);
        self.changes.added_keys.push(key);
    }

    pub fn record_updated(&mut self, index: usize, row: Vec<TupleField>, key: KeySet) {
        self.changes.updated.push(index);
        self.changes.updated_tuples.push(row);
        self.changes.updated_keys.push(key);
    }

    pub fn record_deleted(&mut self, index: usize, key: KeySet) {
        self.changes.deleted.push(index);
        self.changes.deleted_keys.push(key);
    }

    pub fn record_rollback(&mut self, index: usize, op: RollbackOp, key: KeySet) {
        self.changes.rollback.push(RollbackEntry { index, op, key });
    }

    // ---- chain ----

    pub fn push_successor(&mut self, r: ResultCache) { self.next.push(r); }
    pub fn successors(&self) -> &[ResultCache] { &self.next }
    pub fn successors_mut(&mut self) -> &mut [ResultCache] { &mut self.next }

    /// Iterate this result followed by its successors.
    pub fn chain(&self) -> impl Iterator<Item = &ResultCache> { std::iter::once(self).chain(self.next.iter()) }

    // ---- teardown ----

    /// Release rows, keys and change buffers and zero every counter. Safe to repeat.
    pub fn free_memory(&mut self) {
        self.tuples.release();
        self.keyset.release();
        self.changes.release();
        self.num_total_read = 0;
        self.window_start = 0;
        self.curs_tuple = -1;
        self.current_row = -1;
    }

    pub fn close(&mut self) { self.close_result(false); }

    /// Close and drop the field metadata as well.
    pub fn destroy(mut self) { self.close_result(true); }

    fn close_result(&mut self, destroy: bool) {
        self.free_memory();
        self.set_cursor(None);
        if destroy { self.fields = None; }
        self.command = None;
        self.message = None;
        self.notice = None;
        self.next.clear();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool { self.closed }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        if self.cursor_name.take().is_some() { self.notify_cursor(false); }
    }
}

fn append_joined(slot: &mut Option<String>, msg: &str) {
    if msg.is_empty() { return; }
    match slot {
        Some(s) => { s.push(';'); s.push_str(msg); }
        None => *slot = Some(msg.to_string()),
    }
}
