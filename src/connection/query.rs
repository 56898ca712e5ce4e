use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::ConnSettings;
use crate::error::{codes, DriverError, DriverResult};
use crate::protocol::ProtocolGeneration;
use crate::result::{ColumnInfo, ResultCache, ResultStatus, NUM_KEY_FIELDS};
use crate::transport::{Transport, WireError};
use crate::wire::decoder::read_row_description;
use crate::wire::{encode_query, encode_startup, send_request, tags, WireTupleDecoder};

use super::{ConnStatus, Connection};

static SEARCH_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*set\s+(?:\S+\s+)*?search_path\b").unwrap_or_else(|_| Regex::new("^$").unwrap())
});

/// True for `SET [SESSION|LOCAL] search_path ...` statements.
pub fn is_setting_search_path(sql: &str) -> bool { SEARCH_PATH_RE.is_match(sql) }

/// Send the startup request and read until the gateway is ready.
/// Returns the parameter status pairs it reported.
pub(super) fn startup(t: &mut dyn Transport, settings: &ConnSettings) -> DriverResult<Vec<(String, String)>> {
    let req = encode_startup(
        settings.database.as_deref().unwrap_or(""),
        settings.username.as_deref().unwrap_or(""),
        settings.password.as_deref().unwrap_or(""),
    );
    send_request(t, &req).map_err(|e| DriverError::Communication {
        code: codes::CONNECTION_COULD_NOT_SEND,
        message: format!("Could not send the startup packet: {}", e),
    })?;
    let mut params = Vec::new();
    let mut authenticated = false;
    loop {
        match t.read_u8()? {
            tags::AUTH_OK => authenticated = true,
            tags::PARAMETER_STATUS => {
                let name = t.read_cstring()?;
                let value = t.read_cstring()?;
                params.push((name, value));
            }
            tags::NOTICE => {
                let msg = t.read_cstring()?;
                info!(target: "conn", "startup notice: {}", msg);
            }
            tags::ERROR => {
                let msg = t.read_cstring()?;
                return Err(DriverError::Communication { code: codes::CONNECTION_NO_SUCH_DATABASE, message: msg });
            }
            tags::READY => break,
            other => return Err(WireError::UnexpectedTag(other).into()),
        }
    }
    if !authenticated {
        return Err(DriverError::bad_response("The gateway did not authenticate the session"));
    }
    Ok(params)
}

/// Keysets are only built from a description ending in `ctid, oid`.
fn ends_with_identity_columns(columns: &ColumnInfo) -> bool {
    let n = columns.len();
    n >= NUM_KEY_FIELDS && columns.name(n - 2) == Some("ctid") && columns.name(n - 1) == Some("oid")
}

/// Read responses until ready. Results after the first completed one become
/// successors of `target`. Returns the gateway's error text, if it sent any.
fn read_response(
    t: &mut dyn Transport,
    generation: ProtocolGeneration,
    target: &mut ResultCache,
    keyset: bool,
    params: &mut Vec<(String, String)>,
) -> DriverResult<Option<String>> {
    let decoder = WireTupleDecoder::new(generation);
    let mut extra: Vec<ResultCache> = Vec::new();
    let mut done = false;
    let mut server_error: Option<String> = None;
    loop {
        let tag = t.read_u8()?;
        let starts_result = matches!(tag, tags::ROW_DESCRIPTION | tags::EMPTY_QUERY | tags::COMMAND_COMPLETE | tags::ERROR);
        if done && starts_result {
            extra.push(target.successor());
            done = false;
        }
        let cur = match extra.last_mut() { Some(r) => r, None => &mut *target };
        match tag {
            tags::ROW_DESCRIPTION => {
                let columns = read_row_description(t)?;
                let keyed = keyset && ends_with_identity_columns(&columns);
                if keyset && !keyed { debug!(target: "qresult", "row description has no ctid/oid pair, keyset off"); }
                cur.define_fields(columns, keyed)?;
            }
            tags::TEXT_ROW | tags::BINARY_ROW => decoder.read_tuple(t, cur, tag == tags::BINARY_ROW)?,
            tags::COMMAND_COMPLETE => {
                let cmd = t.read_cstring()?;
                cur.set_command(Some(&cmd));
                cur.set_status(if cur.num_fields() > 0 { ResultStatus::TuplesOk } else { ResultStatus::CommandOk });
                done = true;
            }
            tags::EMPTY_QUERY => {
                cur.set_status(ResultStatus::EmptyQuery);
                done = true;
            }
            tags::NOTICE => {
                let msg = t.read_cstring()?;
                cur.add_notice(&msg);
            }
            tags::ERROR => {
                let msg = t.read_cstring()?;
                cur.set_status(ResultStatus::FatalError);
                cur.add_message(&msg);
                server_error = Some(match server_error { Some(prev) => format!("{};{}", prev, msg), None => msg });
                done = true;
            }
            tags::PARAMETER_STATUS => {
                let name = t.read_cstring()?;
                let value = t.read_cstring()?;
                params.push((name, value));
            }
            tags::READY => break,
            other => return Err(WireError::UnexpectedTag(other).into()),
        }
    }
    for r in extra { target.push_successor(r); }
    Ok(server_error)
}

impl Connection {
    /// Send one query and read its whole response into `target`.
    pub(crate) fn execute_into(&self, sql: &str, target: &mut ResultCache, keyset: bool) -> DriverResult<()> {
        let max = self.max_query_len();
        if max > 0 && sql.len() >= max {
            return Err(self.fail(DriverError::Communication {
                code: codes::CONNECTION_MSG_TOO_LONG,
                message: format!("Query string is too long ({} bytes, limit {})", sql.len(), max),
            }));
        }
        let generation = self.generation();
        let _exec = self.begin_execution().map_err(|e| self.fail(e))?;
        let mut params = Vec::new();
        let outcome = {
            let mut io = self.io.lock();
            let Some(t) = io.as_deref_mut() else {
                return Err(self.fail(DriverError::Communication {
                    code: codes::CONNECTION_SERVER_NOT_REACHED,
                    message: "The connection has no transport".to_string(),
                }));
            };
            debug!(target: "conn", "conn {} send query: {}", self.id, sql);
            match send_request(t, &encode_query(generation, sql)) {
                Ok(()) => read_response(t, generation, target, keyset, &mut params),
                Err(e) => Err(DriverError::Communication {
                    code: codes::CONNECTION_COULD_NOT_SEND,
                    message: format!("Could not send query to the gateway: {}", e),
                }),
            }
        };
        if !params.is_empty() {
            let mut st = self.state.lock();
            for (name, value) in params {
                match name.as_str() {
                    "server_encoding" => st.server_encoding = Some(value),
                    "client_encoding" => st.client_encoding = Some(value),
                    _ => {}
                }
            }
        }
        match outcome {
            Ok(None) => {
                if is_setting_search_path(sql) { self.state.lock().current_schema = None; }
                Ok(())
            }
            Ok(Some(server_msg)) => Err(self.fail(DriverError::server(server_msg))),
            Err(e) => {
                // the rest of the response is still on the wire
                self.mark_lost();
                Err(self.fail(e))
            }
        }
    }

    /// Drop a session whose response stream can no longer be trusted.
    fn mark_lost(&self) {
        if let Some(mut t) = self.io.lock().take() { t.close(); }
        self.state.lock().status = ConnStatus::NotConnected;
        warn!(target: "conn", "conn {} lost its gateway session", self.id);
    }

    /// Run `sql` and return its result chain.
    pub fn send_query(self: &Arc<Self>, sql: &str) -> DriverResult<ResultCache> {
        let mut res = ResultCache::for_connection(self);
        self.execute_into(sql, &mut res, false)?;
        Ok(res)
    }

    /// Apply session defaults through an internal statement. Failures are not fatal.
    pub(super) fn setenv(self: &Arc<Self>) -> bool {
        let stmt = match self.alloc_statement() {
            Ok(s) => s,
            Err(_) => return false,
        };
        stmt.set_internal(true);
        let mut ok = true;
        if let Err(e) = stmt.exec_direct("set DateStyle to 'ISO'") {
            debug!(target: "conn", "conn {} set DateStyle failed: {}", self.id, e);
            ok = false;
        }
        if self.server_version().at_least(7, 4) {
            if let Err(e) = stmt.exec_direct("set extra_float_digits to 2") {
                debug!(target: "conn", "conn {} set extra_float_digits failed: {}", self.id, e);
                ok = false;
            }
        }
        let _ = self.free_statement(&stmt);
        ok
    }

    /// Current schema, fetched once and cached while schema support is on.
    pub fn current_schema(self: &Arc<Self>) -> Option<String> {
        {
            let st = self.state.lock();
            if let Some(s) = &st.current_schema { return Some(s.clone()); }
            if !st.schema_support { return None; }
        }
        let res = self.send_query("select current_schema()").ok()?;
        if res.row_count() != 1 { return None; }
        let schema = res.row(0)?.first()?.as_str()?.into_owned();
        self.state.lock().current_schema = Some(schema.clone());
        Some(schema)
    }
}
