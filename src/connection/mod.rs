//! Connection lifecycle manager.
//!
//! A [`Connection`] owns the statement and descriptor tables, the status state
//! machine, the single pending error and the transport session. Mutable state
//! sits behind one lock that is never held across a transport read; the
//! transport has its own lock, always taken before the state lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ConnSettings;
use crate::descriptor::Descriptor;
use crate::error::{codes, DriverError, DriverResult};
use crate::protocol::{ProtocolGeneration, ServerVersion};
use crate::result::ResultCache;
use crate::statement::Statement;
use crate::transport::{TcpTransport, Transport};
use crate::wire::{encode_terminate, send_request};

mod cursors;
mod handles;
mod query;

pub use handles::{HandleTable, STMT_INCREMENT};

static CONN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub const BUSY_MESSAGE: &str = "A transaction is currently being executed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnStatus {
    NotConnected,
    Connected,
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Default)]
struct ErrorState {
    code: i32,
    message: Option<String>,
    composed: Option<String>,
}

#[derive(Debug)]
struct ConnState {
    status: ConnStatus,
    settings: ConnSettings,
    generation: ProtocolGeneration,
    version: ServerVersion,
    isolation: IsolationLevel,
    schema_support: bool,
    statements: HandleTable<Statement>,
    descriptors: HandleTable<Descriptor>,
    error: ErrorState,
    ncursors: usize,
    discards: Vec<String>,
    current_schema: Option<String>,
    server_encoding: Option<String>,
    client_encoding: Option<String>,
}

impl ConnState {
    fn new() -> Self {
        let generation = ProtocolGeneration::V74;
        Self {
            status: ConnStatus::NotConnected,
            settings: ConnSettings::default(),
            generation,
            version: generation.version(),
            isolation: IsolationLevel::ReadCommitted,
            schema_support: false,
            statements: HandleTable::default(),
            descriptors: HandleTable::default(),
            error: ErrorState::default(),
            ncursors: 0,
            discards: Vec::new(),
            current_schema: None,
            server_encoding: None,
            client_encoding: None,
        }
    }

    /// Option and session state back to what a fresh connection has.
    fn reset_session(&mut self) {
        self.status = ConnStatus::NotConnected;
        self.settings = ConnSettings::default();
        self.generation = ProtocolGeneration::V74;
        self.version = self.generation.version();
        self.isolation = IsolationLevel::ReadCommitted;
        self.schema_support = false;
        self.discards.clear();
        self.current_schema = None;
        self.server_encoding = None;
        self.client_encoding = None;
    }
}

pub struct Connection {
    id: u64,
    state: Mutex<ConnState>,
    io: Mutex<Option<Box<dyn Transport>>>,
    table_cache: Mutex<HashMap<(String, String), ResultCache>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Holds a connection in `Executing`; dropping it returns the connection to `Connected`.
pub struct ExecGuard<'a> {
    conn: &'a Connection,
}

impl Drop for ExecGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.conn.state.lock();
        if st.status == ConnStatus::Executing { st.status = ConnStatus::Connected; }
    }
}

impl Connection {
    /// A fresh, unconnected connection: every option unset, read committed,
    /// transactions unsupported.
    pub fn create() -> Arc<Connection> {
        let id = CONN_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        debug!(target: "conn", "conn {} created", id);
        Arc::new(Connection {
            id,
            state: Mutex::new(ConnState::new()),
            io: Mutex::new(None),
            table_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> u64 { self.id }
    pub fn status(&self) -> ConnStatus { self.state.lock().status }
    pub fn settings(&self) -> ConnSettings { self.state.lock().settings.clone() }
    pub fn generation(&self) -> ProtocolGeneration { self.state.lock().generation }
    pub fn server_version(&self) -> ServerVersion { self.state.lock().version }
    pub fn isolation(&self) -> IsolationLevel { self.state.lock().isolation }
    pub fn transactions_supported(&self) -> bool { false }
    pub fn server_encoding(&self) -> Option<String> { self.state.lock().server_encoding.clone() }
    pub fn client_encoding(&self) -> Option<String> { self.state.lock().client_encoding.clone() }

    /// Longest query text the gateway accepts; 0 means unlimited.
    pub fn max_query_len(&self) -> usize { self.state.lock().generation.max_query_len() }

    // ---- connect / teardown ----

    pub fn connect(self: &Arc<Self>, settings: ConnSettings, username: Option<&str>, password: Option<&str>) -> DriverResult<()> {
        self.connect_with(settings, username, password, Box::new(TcpTransport::new()))
    }

    /// Connect over a caller-supplied transport.
    pub fn connect_with(
        self: &Arc<Self>,
        mut settings: ConnSettings,
        username: Option<&str>,
        password: Option<&str>,
        mut transport: Box<dyn Transport>,
    ) -> DriverResult<()> {
        if self.status() != ConnStatus::NotConnected {
            return Err(self.fail(DriverError::invalid_state(codes::CONN_OPENDB_ERROR, "Already connected.")));
        }
        settings.merge_credentials(username, password);
        settings.apply_defaults();
        settings.validate().map_err(|e| self.fail(e))?;

        let generation = ProtocolGeneration::resolve(settings.protocol.as_deref());
        let moniker = settings.effective_moniker();
        info!(target: "conn", "conn {} connecting ({}), protocol {:?}", self.id, settings.log_summary(), generation);

        if let Err(e) = transport.connect(&moniker) {
            return Err(self.fail(DriverError::Communication {
                code: codes::CONNECTION_SERVER_NOT_REACHED,
                message: format!("Could not connect to the server: {}", e),
            }));
        }
        let params = match query::startup(transport.as_mut(), &settings) {
            Ok(p) => p,
            Err(e) => {
                transport.close();
                return Err(self.fail(e));
            }
        };

        *self.io.lock() = Some(transport);
        {
            let mut st = self.state.lock();
            for (name, value) in params {
                match name.as_str() {
                    "server_encoding" => st.server_encoding = Some(value),
                    "client_encoding" => st.client_encoding = Some(value),
                    _ => {}
                }
            }
            st.generation = generation;
            st.version = generation.version();
            st.schema_support = st.version.at_least(7, 3);
            st.settings = settings;
            st.status = ConnStatus::Connected;
        }
        if !self.setenv() {
            warn!(target: "conn", "conn {} session defaults were not fully applied", self.id);
        }
        info!(target: "conn", "conn {} connected", self.id);
        Ok(())
    }

    /// Not implemented by this driver.
    pub fn browse_connect(&self, _request: &str) -> DriverResult<String> {
        Err(self.fail(DriverError::not_implemented("Function not implemented")))
    }

    pub fn disconnect(&self) -> DriverResult<()> {
        self.ensure_idle()?;
        if self.status() == ConnStatus::Connected {
            self.discard_marked_objects();
            if let Some(t) = self.io.lock().as_deref_mut() {
                if let Err(e) = send_request(t, &encode_terminate()) {
                    debug!(target: "conn", "conn {} terminate not sent: {}", self.id, e);
                }
            }
        }
        self.cleanup(false);
        info!(target: "conn", "conn {} disconnected", self.id);
        Ok(())
    }

    /// Disconnect and release the tables and the transport session.
    pub fn destroy(&self) -> DriverResult<()> {
        self.ensure_idle()?;
        self.cleanup(true);
        if let Some(mut t) = self.io.lock().take() { t.close(); }
        debug!(target: "conn", "conn {} destroyed", self.id);
        Ok(())
    }

    fn ensure_idle(&self) -> DriverResult<()> {
        if self.status() == ConnStatus::Executing {
            return Err(self.fail(DriverError::busy(BUSY_MESSAGE)));
        }
        Ok(())
    }

    /// Tear down statements, descriptors and session caches. Returns false if executing.
    fn cleanup(&self, release_tables: bool) -> bool {
        let (statements, descriptors) = {
            let mut st = self.state.lock();
            if st.status == ConnStatus::Executing { return false; }
            st.reset_session();
            if release_tables {
                (st.statements.release(), st.descriptors.release())
            } else {
                (st.statements.take_all(), st.descriptors.take_all())
            }
        };
        for s in statements {
            s.detach();
            s.drop_result();
        }
        for d in descriptors { d.detach(); }
        let cached = std::mem::take(&mut *self.table_cache.lock());
        drop(cached);
        if let Some(t) = self.io.lock().as_deref_mut() { t.close(); }
        true
    }

    // ---- handle tables ----

    /// Put `stmt` in the first free slot and attach it to this connection.
    pub fn add_statement(self: &Arc<Self>, stmt: &Arc<Statement>) -> DriverResult<usize> {
        let slot = {
            let mut st = self.state.lock();
            if st.statements.position(stmt).is_some() {
                return Err(DriverError::invalid_state(codes::CONN_STMT_ALLOC_ERROR, "statement already attached"));
            }
            st.statements.insert(stmt.clone())
        };
        stmt.attach(Arc::downgrade(self));
        debug!(target: "conn", "conn {} stmt {} in slot {}", self.id, stmt.id(), slot);
        Ok(slot)
    }

    /// Null the statement's slot. Refused while the statement executes.
    pub fn remove_statement(&self, stmt: &Arc<Statement>) -> DriverResult<()> {
        let removed = {
            let mut st = self.state.lock();
            if stmt.is_executing() {
                return Err(DriverError::busy("statement is executing"));
            }
            st.statements.remove(stmt)
        };
        if !removed {
            return Err(DriverError::invalid_handle("statement does not belong to this connection"));
        }
        Ok(())
    }

    /// Allocate a statement and register it.
    pub fn alloc_statement(self: &Arc<Self>) -> DriverResult<Arc<Statement>> {
        let stmt = Statement::new();
        self.add_statement(&stmt).map_err(|e| self.fail(e))?;
        Ok(stmt)
    }

    /// Remove a statement, queue its open cursor for closing and drop its result.
    pub fn free_statement(&self, stmt: &Arc<Statement>) -> DriverResult<()> {
        self.remove_statement(stmt)?;
        if let Some(cursor) = stmt.result_cursor() {
            self.mark_object_to_discard('p', &cursor);
        }
        stmt.drop_result();
        stmt.detach();
        Ok(())
    }

    pub fn statement_capacity(&self) -> usize { self.state.lock().statements.capacity() }
    pub fn statement_count(&self) -> usize { self.state.lock().statements.live() }
    pub fn statements(&self) -> Vec<Arc<Statement>> { self.state.lock().statements.iter().cloned().collect() }

    pub fn add_descriptor(self: &Arc<Self>, desc: &Arc<Descriptor>) -> usize {
        let slot = self.state.lock().descriptors.insert(desc.clone());
        desc.attach(Arc::downgrade(self));
        slot
    }

    pub fn remove_descriptor(&self, desc: &Arc<Descriptor>) -> bool {
        let removed = self.state.lock().descriptors.remove(desc);
        if removed { desc.detach(); }
        removed
    }

    pub fn descriptor_capacity(&self) -> usize { self.state.lock().descriptors.capacity() }
    pub fn descriptor_count(&self) -> usize { self.state.lock().descriptors.live() }

    // ---- errors ----

    /// Record the pending error. A non-zero code flags every attached statement
    /// so its next error read consults this connection.
    pub fn set_error(&self, code: i32, message: &str) {
        let mut st = self.state.lock();
        st.error = ErrorState { code, message: Some(message.to_string()), composed: None };
        if code != codes::NO_ERROR {
            for s in st.statements.iter() { s.flag_connection_error(); }
        }
    }

    /// Record `err` as the pending error and hand it back.
    pub(crate) fn fail(&self, err: DriverError) -> DriverError {
        warn!(target: "conn", "conn {} error {}", self.id, err);
        self.set_error(err.code(), err.message());
        err
    }

    /// Read the pending error once. The composed text stays cached after the code is cleared.
    pub fn get_error(&self) -> Option<DriverError> {
        let mut st = self.state.lock();
        if st.error.code == codes::NO_ERROR { return None; }
        if st.error.composed.is_none() {
            st.error.composed = Some(st.error.message.clone().unwrap_or_default());
        }
        let code = std::mem::replace(&mut st.error.code, codes::NO_ERROR);
        let text = st.error.composed.clone().unwrap_or_default();
        Some(DriverError::from_code(code, text))
    }

    /// Last composed error text, kept after [`Connection::get_error`] cleared the code.
    pub fn last_error_text(&self) -> Option<String> { self.state.lock().error.composed.clone() }

    pub fn clear_error(&self) { self.state.lock().error = ErrorState::default(); }

    // ---- cursors ----

    /// Named cursors currently bound to results of this connection.
    pub fn cursors(&self) -> usize { self.state.lock().ncursors }

    pub(crate) fn adjust_cursor_count(&self, opened: bool) {
        let mut st = self.state.lock();
        if opened { st.ncursors += 1; } else { st.ncursors = st.ncursors.saturating_sub(1); }
    }

    // ---- transactions ----

    /// Transactions are not supported by the gateway.
    pub fn begin(&self) -> bool { false }
    pub fn commit(&self) -> bool { false }
    pub fn abort(&self) -> bool { false }

    // ---- table metadata cache ----

    pub fn cache_table_info(&self, schema: &str, table: &str, info: ResultCache) {
        let old = self.table_cache.lock().insert((schema.to_string(), table.to_string()), info);
        drop(old);
    }

    pub fn with_table_info<R>(&self, schema: &str, table: &str, f: impl FnOnce(&ResultCache) -> R) -> Option<R> {
        self.table_cache.lock().get(&(schema.to_string(), table.to_string())).map(f)
    }

    pub fn table_cache_len(&self) -> usize { self.table_cache.lock().len() }

    #[cfg(test)]
    pub(crate) fn force_status(&self, status: ConnStatus) { self.state.lock().status = status; }

    /// Enter `Executing` for the duration of one gateway exchange.
    pub fn begin_execution(&self) -> DriverResult<ExecGuard<'_>> {
        let mut st = self.state.lock();
        match st.status {
            ConnStatus::Connected => {
                st.status = ConnStatus::Executing;
                Ok(ExecGuard { conn: self })
            }
            ConnStatus::Executing => Err(DriverError::busy(BUSY_MESSAGE)),
            ConnStatus::NotConnected => Err(DriverError::Communication {
                code: codes::CONNECTION_SERVER_NOT_REACHED,
                message: "The connection is not open".to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod connection_tests;
