//! Statement handles.
//!
//! A statement belongs to one connection through a weak handle that teardown
//! clears, and owns at most one result chain. SELECTs run through a named
//! server cursor when the connection asks for declare/fetch, refilling the
//! same cache one window at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use regex::Regex;
use tracing::debug;

use crate::config::DEFAULT_FETCH_SIZE;
use crate::connection::Connection;
use crate::error::{codes, DriverError, DriverResult};
use crate::result::{CacheState, ResultCache, TupleField};

static STMT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

static SELECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(select|with)\b").unwrap_or_else(|_| Regex::new("^$").unwrap())
});

static PLAIN_SELECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*select\b").unwrap_or_else(|_| Regex::new("^$").unwrap())
});

pub const MAX_CURSOR_LEN: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementOptions {
    /// Rows per window; falls back to the connection's fetch size.
    pub fetch_size: Option<usize>,
    pub with_hold: bool,
    /// Append `ctid, oid` to a plain SELECT's column list and keep them as the
    /// keyset (needs keysets allowed on the connection).
    pub use_keyset: bool,
}

#[derive(Debug)]
pub struct Statement {
    id: u64,
    conn: Mutex<Option<Weak<Connection>>>,
    executing: AtomicBool,
    conn_error_ref: AtomicBool,
    internal: AtomicBool,
    options: Mutex<StatementOptions>,
    cursor_name: Mutex<Option<String>>,
    result: Mutex<Option<ResultCache>>,
    error: Mutex<Option<DriverError>>,
}

impl Statement {
    pub fn new() -> Arc<Statement> {
        Arc::new(Statement {
            id: STMT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            conn: Mutex::new(None),
            executing: AtomicBool::new(false),
            conn_error_ref: AtomicBool::new(false),
            internal: AtomicBool::new(false),
            options: Mutex::new(StatementOptions::default()),
            cursor_name: Mutex::new(None),
            result: Mutex::new(None),
            error: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 { self.id }

    pub fn connection(&self) -> Option<Arc<Connection>> { self.conn.lock().as_ref().and_then(Weak::upgrade) }
    pub fn is_attached(&self) -> bool { self.connection().is_some() }
    pub(crate) fn attach(&self, conn: Weak<Connection>) { *self.conn.lock() = Some(conn); }
    /// Drop the back-reference; no further gateway traffic goes through this statement.
    pub(crate) fn detach(&self) { *self.conn.lock() = None; }

    pub fn is_executing(&self) -> bool { self.executing.load(Ordering::SeqCst) }

    #[cfg(test)]
    pub(crate) fn force_executing(&self, on: bool) { self.executing.store(on, Ordering::SeqCst); }

    /// Internal statements are exempt from transaction wrapping and cursor use.
    pub fn set_internal(&self, on: bool) { self.internal.store(on, Ordering::SeqCst); }
    pub fn is_internal(&self) -> bool { self.internal.load(Ordering::SeqCst) }

    pub fn options(&self) -> StatementOptions { *self.options.lock() }
    pub fn set_options(&self, options: StatementOptions) { *self.options.lock() = options; }

    // ---- errors ----

    pub(crate) fn flag_connection_error(&self) { self.conn_error_ref.store(true, Ordering::SeqCst); }
    pub fn has_connection_error(&self) -> bool { self.conn_error_ref.load(Ordering::SeqCst) }

    fn record(&self, err: DriverError) -> DriverError {
        debug!(target: "stmt", "stmt {} error {}", self.id, err);
        *self.error.lock() = Some(err.clone());
        self.conn_error_ref.store(false, Ordering::SeqCst);
        err
    }

    /// This statement's own error, or else the connection error it was flagged with. One-shot.
    pub fn get_error(&self) -> Option<DriverError> {
        if let Some(e) = self.error.lock().take() { return Some(e); }
        if self.conn_error_ref.swap(false, Ordering::SeqCst) {
            return self.connection()?.get_error();
        }
        None
    }

    // ---- cursor names ----

    pub fn explicit_cursor_name(&self) -> Option<String> { self.cursor_name.lock().clone() }

    /// The assigned cursor name, or a generated `SQL_CUR<conn>_<stmt>`.
    pub fn cursor_name(&self) -> String {
        if let Some(n) = self.explicit_cursor_name() { return n; }
        let conn_id = self.connection().map(|c| c.id()).unwrap_or(0);
        format!("SQL_CUR{}_{}", conn_id, self.id)
    }

    pub fn set_cursor_name(&self, name: &str) -> DriverResult<()> {
        if name.is_empty() || name.len() > MAX_CURSOR_LEN {
            return Err(self.record(DriverError::invalid_state(codes::STMT_INVALID_CURSOR_NAME, "Invalid cursor name")));
        }
        if let Some(conn) = self.connection() {
            if conn.cursor_name_in_use(name, self.id) {
                return Err(self.record(DriverError::invalid_state(codes::STMT_INVALID_CURSOR_NAME, "A cursor with that name already exists")));
            }
        }
        *self.cursor_name.lock() = Some(name.to_string());
        Ok(())
    }

    // ---- results ----

    pub(crate) fn result_slot(&self) -> MutexGuard<'_, Option<ResultCache>> { self.result.lock() }

    /// Cursor name held by the current result.
    pub fn result_cursor(&self) -> Option<String> {
        self.result.lock().as_ref().and_then(|r| r.cursor_name().map(str::to_string))
    }

    pub fn has_result(&self) -> bool { self.result.lock().is_some() }

    pub fn with_result<R>(&self, f: impl FnOnce(&ResultCache) -> R) -> Option<R> { self.result.lock().as_ref().map(f) }

    pub fn take_result(&self) -> Option<ResultCache> { self.result.lock().take() }

    pub(crate) fn drop_result(&self) {
        let old = self.result.lock().take();
        if let Some(r) = old { r.destroy(); }
    }

    // ---- execution ----

    /// Execute `sql`, replacing the previous result chain.
    pub fn exec_direct(&self, sql: &str) -> DriverResult<()> {
        let conn = self.connection()
            .ok_or_else(|| self.record(DriverError::invalid_handle("The statement is not attached to a connection")))?;
        if self.executing.swap(true, Ordering::SeqCst) {
            return Err(self.record(DriverError::busy("The statement is already executing")));
        }
        let outcome = self.run(&conn, sql);
        self.executing.store(false, Ordering::SeqCst);
        outcome.map_err(|e| self.record(e))
    }

    fn run(&self, conn: &Arc<Connection>, sql: &str) -> DriverResult<()> {
        let settings = conn.settings();
        let opts = self.options();
        let keyed_sql = if opts.use_keyset && settings.allow_keyset.unwrap_or(false) { with_identity_columns(sql) } else { None };
        let keyset = keyed_sql.is_some();
        let sql = keyed_sql.as_deref().unwrap_or(sql);
        let windowed = !self.is_internal() && settings.use_declare_fetch.unwrap_or(false) && SELECT_RE.is_match(sql);

        let mut slot = self.result.lock();
        if let Some(old) = slot.take() {
            if let Some(c) = old.cursor_name() { conn.mark_object_to_discard('p', c); }
        }
        let mut res = ResultCache::for_connection(conn);
        let outcome = if windowed {
            let fetch = opts.fetch_size.or(settings.fetch_size).unwrap_or(DEFAULT_FETCH_SIZE).max(1);
            let name = self.cursor_name();
            let declare = format!("declare \"{}\" cursor{} for {}", name, if opts.with_hold { " with hold" } else { "" }, sql);
            debug!(target: "stmt", "stmt {} windowed by {} through {}", self.id, fetch, name);
            conn.execute_into(&declare, &mut res, keyset).and_then(|_| {
                res.set_cursor(Some(&name));
                res.set_withhold(opts.with_hold);
                res.set_cache_size(fetch);
                fetch_window(conn, &mut res, keyset)
            })
        } else {
            conn.execute_into(sql, &mut res, keyset)
        };
        *slot = Some(res);
        outcome
    }

    /// Next row of the current result, refilling the cursor window when it runs dry.
    pub fn fetch(&self) -> DriverResult<Option<Vec<TupleField>>> {
        let mut slot = self.result.lock();
        let Some(res) = slot.as_mut() else {
            return Err(self.record(DriverError::invalid_state(codes::STMT_SEQUENCE_ERROR, "No result to fetch from")));
        };
        loop {
            let state = res.advance_cursor(1);
            if let Some(row) = res.current_tuple() { return Ok(Some(row.to_vec())); }
            if state != CacheState::NeedsRefill { return Ok(None); }
            let Some(conn) = self.connection() else {
                return Err(self.record(DriverError::invalid_handle("The statement is not attached to a connection")));
            };
            let keyset = res.has_keyset();
            self.executing.store(true, Ordering::SeqCst);
            let refill = fetch_window(&conn, res, keyset);
            self.executing.store(false, Ordering::SeqCst);
            refill.map_err(|e| self.record(e))?;
        }
    }

    /// Close the server cursor of the current result and drop the result.
    pub fn close_cursor(&self) -> DriverResult<()> {
        let Some(res) = self.take_result() else { return Ok(()) };
        if let (Some(name), Some(conn)) = (res.cursor_name(), self.connection()) {
            let mut closed = ResultCache::new();
            conn.execute_into(&format!("close \"{}\"", name), &mut closed, false).map_err(|e| self.record(e))?;
        }
        res.destroy();
        Ok(())
    }
}

/// `sql` with `, ctid, oid` added before its top-level FROM, or None when it
/// is not a plain SELECT over a relation.
fn with_identity_columns(sql: &str) -> Option<String> {
    if !PLAIN_SELECT_RE.is_match(sql) { return None; }
    let bytes = sql.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if b == q { quote = None; }
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && keyword_at(bytes, i, b"from") => {
                return Some(format!("{}, ctid, oid {}", sql[..i].trim_end(), &sql[i..]));
            }
            _ => {}
        }
    }
    None
}

fn keyword_at(bytes: &[u8], i: usize, kw: &[u8]) -> bool {
    let ident = |c: u8| c.is_ascii_alphanumeric() || c == b'_';
    bytes.len() >= i + kw.len()
        && bytes[i..i + kw.len()].eq_ignore_ascii_case(kw)
        && (i == 0 || !ident(bytes[i - 1]))
        && bytes.get(i + kw.len()).map_or(true, |c| !ident(*c))
}

/// Fetch the next window of the result's cursor into the same cache.
fn fetch_window(conn: &Connection, res: &mut ResultCache, keyset: bool) -> DriverResult<()> {
    let Some(name) = res.cursor_name().map(str::to_string) else { return Ok(()) };
    let n = res.cache_size().max(1);
    res.begin_window();
    res.enlarge_key_cache(n);
    conn.execute_into(&format!("fetch {} in \"{}\"", n, name), res, keyset)?;
    if res.row_count() < n { res.set_reached_eof(); }
    debug!(target: "stmt", "window of {} rows from {} (eof={})", res.row_count(), name, res.reached_eof());
    Ok(())
}
