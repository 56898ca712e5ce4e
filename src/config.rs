//! Resolved connection settings.
//!
//! The record handed to [`crate::connection::Connection::connect`] after DSN
//! resolution. Every field is an `Option`: `None` means "not configured" and is
//! never confused with a legitimate value such as `false` or `0`.
//! [`ConnSettings::apply_defaults`] fills whatever is still unset.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DriverError, DriverResult};

pub const DEFAULT_PORT: &str = "5432";
pub const DEFAULT_PROTOCOL: &str = "7.4";
pub const DEFAULT_SSLMODE: &str = "disable";
pub const DEFAULT_FETCH_SIZE: usize = 100;
pub const DEFAULT_INT8_AS: i32 = 0;
/// Connect strings shorter than this are always rendered in abbreviated form.
pub const ABBREV_THRESHOLD: usize = 1024;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnSettings {
    pub dsn: Option<String>,
    pub driver: Option<String>,
    pub server: Option<String>,
    pub port: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Transport moniker, e.g. `tcp:db.example:5432`.
    pub moniker: Option<String>,
    /// Declared protocol string; resolved to a generation at connect time.
    pub protocol: Option<String>,
    pub sslmode: Option<String>,
    pub read_only: Option<bool>,

    pub disallow_premature: Option<bool>,
    pub allow_keyset: Option<bool>,
    pub lf_conversion: Option<bool>,
    pub true_is_minus1: Option<bool>,
    pub int8_as: Option<i32>,
    pub bytea_as_longvarbinary: Option<bool>,
    pub use_server_side_prepare: Option<bool>,
    pub lower_case_identifier: Option<bool>,
    /// Run SELECTs through a server cursor, `fetch_size` rows at a time.
    pub use_declare_fetch: Option<bool>,
    /// Rows per windowed fetch.
    pub fetch_size: Option<usize>,
    pub force_abbrev_connstr: Option<bool>,
    pub fake_mss: Option<bool>,
    pub bde_environment: Option<bool>,
    pub cvt_null_date_string: Option<bool>,
    pub show_oid_column: Option<bool>,
    pub row_versioning: Option<bool>,
    pub show_system_tables: Option<bool>,
}

fn is_blank(v: &Option<String>) -> bool { v.as_deref().map(str::is_empty).unwrap_or(true) }

fn parse_flag(v: &str) -> bool {
    let s = v.trim().to_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

impl ConnSettings {
    /// Overlay explicit credentials. A non-empty value overrides the resolved one;
    /// an empty one means "not overridden" and keeps what the DSN provided.
    pub fn merge_credentials(&mut self, username: Option<&str>, password: Option<&str>) {
        if let Some(u) = username.filter(|u| !u.is_empty()) { self.username = Some(u.to_string()); }
        if let Some(p) = password.filter(|p| !p.is_empty()) { self.password = Some(p.to_string()); }
    }

    pub fn apply_defaults(&mut self) {
        if is_blank(&self.port) { self.port = Some(DEFAULT_PORT.to_string()); }
        if is_blank(&self.protocol) { self.protocol = Some(DEFAULT_PROTOCOL.to_string()); }
        if is_blank(&self.sslmode) { self.sslmode = Some(DEFAULT_SSLMODE.to_string()); }
        self.read_only.get_or_insert(false);
        self.disallow_premature.get_or_insert(false);
        self.allow_keyset.get_or_insert(false);
        self.lf_conversion.get_or_insert(cfg!(windows));
        self.true_is_minus1.get_or_insert(false);
        self.int8_as.get_or_insert(DEFAULT_INT8_AS);
        self.bytea_as_longvarbinary.get_or_insert(false);
        self.use_server_side_prepare.get_or_insert(false);
        self.lower_case_identifier.get_or_insert(false);
        self.use_declare_fetch.get_or_insert(false);
        self.fetch_size.get_or_insert(DEFAULT_FETCH_SIZE);
        self.force_abbrev_connstr.get_or_insert(false);
        self.fake_mss.get_or_insert(false);
        self.bde_environment.get_or_insert(false);
        self.cvt_null_date_string.get_or_insert(false);
        self.show_oid_column.get_or_insert(false);
        self.row_versioning.get_or_insert(false);
        self.show_system_tables.get_or_insert(false);
    }

    /// Port and database are required everywhere; the server name only on Windows.
    pub fn validate(&self) -> DriverResult<()> {
        let missing_server = cfg!(windows) && is_blank(&self.server);
        if is_blank(&self.port) || is_blank(&self.database) || missing_server {
            return Err(DriverError::configuration("Missing server name, port, or database name in call to connect."));
        }
        Ok(())
    }

    /// Transport moniker to dial, falling back to `tcp:<server>:<port>`.
    pub fn effective_moniker(&self) -> String {
        if let Some(m) = self.moniker.as_deref().filter(|m| !m.is_empty()) { return m.to_string(); }
        let server = self.server.as_deref().filter(|s| !s.is_empty()).unwrap_or("localhost");
        let port = self.port.as_deref().filter(|p| !p.is_empty()).unwrap_or(DEFAULT_PORT);
        format!("tcp:{}:{}", server, port)
    }

    /// Copy one connect-string attribute. Returns false for unknown keys.
    pub fn set_attribute(&mut self, attribute: &str, value: &str) -> bool {
        let v = Some(value.to_string());
        match attribute.trim().to_ascii_lowercase().as_str() {
            "dsn" => self.dsn = v,
            "driver" => self.driver = v,
            "database" => self.database = v,
            "server" | "servername" => self.server = v,
            "uid" | "username" => self.username = v,
            "pwd" | "password" => self.password = v,
            "port" => self.port = v,
            "readonly" => self.read_only = Some(parse_flag(value)),
            "moniker" => self.moniker = v,
            "protocol" => self.protocol = v,
            "sslmode" => self.sslmode = v,
            "fetch" => self.fetch_size = value.trim().parse().ok(),
            "usedeclarefetch" => self.use_declare_fetch = Some(parse_flag(value)),
            "updatablecursors" => self.allow_keyset = Some(parse_flag(value)),
            _ => return false,
        }
        true
    }

    /// Parse `KEY=value;KEY=value` pairs; unknown keys are skipped.
    pub fn from_connect_string(s: &str) -> Self {
        let mut out = Self::default();
        for pair in s.split(';') {
            let Some((k, v)) = pair.split_once('=') else { continue };
            let v = v.trim().trim_start_matches('{').trim_end_matches('}');
            if !out.set_attribute(k, v) {
                debug!(target: "conn", "ignoring unknown connect attribute '{}'", k.trim());
            }
        }
        out
    }

    /// Render a connect string no longer than `max_len`; empty if it cannot fit.
    pub fn connect_string(&self, max_len: usize) -> String {
        let (key, name) = match self.dsn.as_deref().filter(|d| !d.is_empty()) {
            Some(dsn) => ("DSN", dsn),
            None => ("DRIVER", self.driver.as_deref().unwrap_or("")),
        };
        let mut out = format!(
            "{}={};DATABASE={};SERVER={};PORT={};UID={};PWD={}",
            key, name,
            self.database.as_deref().unwrap_or(""),
            self.server.as_deref().unwrap_or(""),
            self.port.as_deref().unwrap_or(""),
            self.username.as_deref().unwrap_or(""),
            self.password.as_deref().unwrap_or(""),
        );
        let abbrev = max_len < ABBREV_THRESHOLD || self.force_abbrev_connstr.unwrap_or(false);
        if abbrev {
            out.push(';');
        } else {
            out.push_str(&format!(
                ";READONLY={};PROTOCOL={};MONIKER={};",
                if self.read_only.unwrap_or(false) { 1 } else { 0 },
                self.protocol.as_deref().unwrap_or(""),
                self.moniker.as_deref().unwrap_or(""),
            ));
        }
        if out.len() > max_len { return String::new(); }
        out
    }

    /// Overlay `ROWGATE_*` values found through `lookup` onto `self`.
    pub fn overlay_env_with<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let pairs = [
            ("ROWGATE_DSN", "dsn"), ("ROWGATE_SERVER", "server"), ("ROWGATE_PORT", "port"),
            ("ROWGATE_DATABASE", "database"), ("ROWGATE_USER", "uid"), ("ROWGATE_PASSWORD", "pwd"),
            ("ROWGATE_MONIKER", "moniker"), ("ROWGATE_PROTOCOL", "protocol"), ("ROWGATE_SSLMODE", "sslmode"),
            ("ROWGATE_READONLY", "readonly"), ("ROWGATE_FETCH", "fetch"),
            ("ROWGATE_DECLARE_FETCH", "usedeclarefetch"),
        ];
        for (var, attr) in pairs {
            if let Some(v) = lookup(var) { self.set_attribute(attr, &v); }
        }
    }

    pub fn from_env() -> Self {
        let mut s = Self::default();
        s.overlay_env_with(|k| std::env::var(k).ok());
        s
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading settings file {}", path.display()))?;
        let s: Self = serde_json::from_str(&text).with_context(|| format!("parsing settings file {}", path.display()))?;
        Ok(s)
    }

    /// One-line description safe for logs (password masked).
    pub fn log_summary(&self) -> String {
        format!(
            "DSN='{}', server='{}', port='{}', database='{}', username='{}', password='{}', moniker='{}', protocol='{}'",
            self.dsn.as_deref().unwrap_or(""),
            self.server.as_deref().unwrap_or(""),
            self.port.as_deref().unwrap_or(""),
            self.database.as_deref().unwrap_or(""),
            self.username.as_deref().unwrap_or(""),
            if self.password.is_some() { "xxxxx" } else { "" },
            self.moniker.as_deref().unwrap_or(""),
            self.protocol.as_deref().unwrap_or(""),
        )
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
