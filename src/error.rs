//! Driver error model and mapping helpers.
//! One enum is shared by the connection, statement and result layers. Every
//! variant carries the numeric code recorded on the owning handle plus a message,
//! and maps onto a SQLSTATE for the API surface.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::transport::WireError;

/// Numeric error codes recorded on connection and statement handles.
pub mod codes {
    pub const NO_ERROR: i32 = 0;

    pub const CONNECTION_SERVER_NOT_REACHED: i32 = 101;
    pub const CONNECTION_MSG_TOO_LONG: i32 = 103;
    pub const CONNECTION_COULD_NOT_SEND: i32 = 104;
    pub const CONNECTION_NO_SUCH_DATABASE: i32 = 105;
    pub const CONNECTION_BACKEND_CRAZY: i32 = 106;
    pub const CONNECTION_SERVER_REPORTED_ERROR: i32 = 108;
    pub const CONNECTION_COULD_NOT_RECEIVE: i32 = 109;
    pub const CONNECTION_COMMUNICATION_ERROR: i32 = 113;

    pub const CONN_INIREAD_ERROR: i32 = 201;
    pub const CONN_OPENDB_ERROR: i32 = 202;
    pub const CONN_STMT_ALLOC_ERROR: i32 = 203;
    pub const CONN_IN_USE: i32 = 204;
    pub const CONN_INVALID_HANDLE: i32 = 206;
    pub const CONN_NO_MEMORY_ERROR: i32 = 208;
    pub const CONN_NOT_IMPLEMENTED_ERROR: i32 = 209;

    pub const STMT_EXEC_ERROR: i32 = 1;
    pub const STMT_SEQUENCE_ERROR: i32 = 3;
    pub const STMT_INVALID_CURSOR_NAME: i32 = 19;
    pub const STMT_BAD_RESPONSE: i32 = 40;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverError {
    Allocation { code: i32, message: String },
    InvalidHandle { code: i32, message: String },
    Busy { code: i32, message: String },
    Configuration { code: i32, message: String },
    Communication { code: i32, message: String },
    BadResponse { code: i32, message: String },
    NotImplemented { code: i32, message: String },
    InvalidState { code: i32, message: String },
    Server { code: i32, message: String },
}

impl DriverError {
    pub fn code(&self) -> i32 {
        match self {
            DriverError::Allocation { code, .. }
            | DriverError::InvalidHandle { code, .. }
            | DriverError::Busy { code, .. }
            | DriverError::Configuration { code, .. }
            | DriverError::Communication { code, .. }
            | DriverError::BadResponse { code, .. }
            | DriverError::NotImplemented { code, .. }
            | DriverError::InvalidState { code, .. }
            | DriverError::Server { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DriverError::Allocation { message, .. }
            | DriverError::InvalidHandle { message, .. }
            | DriverError::Busy { message, .. }
            | DriverError::Configuration { message, .. }
            | DriverError::Communication { message, .. }
            | DriverError::BadResponse { message, .. }
            | DriverError::NotImplemented { message, .. }
            | DriverError::InvalidState { message, .. }
            | DriverError::Server { message, .. } => message.as_str(),
        }
    }

    pub fn allocation<S: Into<String>>(msg: S) -> Self { DriverError::Allocation { code: codes::CONN_NO_MEMORY_ERROR, message: msg.into() } }
    pub fn invalid_handle<S: Into<String>>(msg: S) -> Self { DriverError::InvalidHandle { code: codes::CONN_INVALID_HANDLE, message: msg.into() } }
    pub fn busy<S: Into<String>>(msg: S) -> Self { DriverError::Busy { code: codes::CONN_IN_USE, message: msg.into() } }
    pub fn configuration<S: Into<String>>(msg: S) -> Self { DriverError::Configuration { code: codes::CONN_INIREAD_ERROR, message: msg.into() } }
    pub fn communication<S: Into<String>>(msg: S) -> Self { DriverError::Communication { code: codes::CONNECTION_COMMUNICATION_ERROR, message: msg.into() } }
    pub fn bad_response<S: Into<String>>(msg: S) -> Self { DriverError::BadResponse { code: codes::CONNECTION_BACKEND_CRAZY, message: msg.into() } }
    pub fn not_implemented<S: Into<String>>(msg: S) -> Self { DriverError::NotImplemented { code: codes::CONN_NOT_IMPLEMENTED_ERROR, message: msg.into() } }
    pub fn invalid_state<S: Into<String>>(code: i32, msg: S) -> Self { DriverError::InvalidState { code, message: msg.into() } }
    pub fn server<S: Into<String>>(msg: S) -> Self { DriverError::Server { code: codes::CONNECTION_SERVER_REPORTED_ERROR, message: msg.into() } }

    /// Rebuild an error from a code recorded on a handle.
    pub fn from_code<S: Into<String>>(code: i32, msg: S) -> Self {
        let message = msg.into();
        match code {
            codes::CONN_NO_MEMORY_ERROR | codes::CONN_STMT_ALLOC_ERROR => DriverError::Allocation { code, message },
            codes::CONN_INVALID_HANDLE => DriverError::InvalidHandle { code, message },
            codes::CONN_IN_USE => DriverError::Busy { code, message },
            codes::CONN_INIREAD_ERROR => DriverError::Configuration { code, message },
            codes::CONNECTION_BACKEND_CRAZY | codes::STMT_BAD_RESPONSE => DriverError::BadResponse { code, message },
            codes::CONNECTION_SERVER_REPORTED_ERROR | codes::STMT_EXEC_ERROR => DriverError::Server { code, message },
            101..=113 => DriverError::Communication { code, message },
            codes::CONN_NOT_IMPLEMENTED_ERROR => DriverError::NotImplemented { code, message },
            _ => DriverError::InvalidState { code, message },
        }
    }

    /// SQLSTATE reported to the API surface for this error.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            DriverError::Allocation { .. } => "HY001",       // memory allocation error
            DriverError::InvalidHandle { .. } => "HY000",
            DriverError::Busy { .. } => "25000",             // invalid transaction state
            DriverError::Configuration { .. } => "08001",    // unable to establish connection
            DriverError::Communication { .. } => "08S01",    // communication link failure
            DriverError::BadResponse { .. } => "08S01",
            DriverError::NotImplemented { .. } => "HYC00",   // optional feature not implemented
            DriverError::InvalidState { code, .. } => match *code {
                codes::CONN_OPENDB_ERROR => "08002",         // connection name in use
                codes::STMT_INVALID_CURSOR_NAME => "3C000",  // duplicate cursor name
                _ => "HY010",                                // function sequence error
            },
            DriverError::Server { .. } => "42000",
        }
    }
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message())
    }
}

impl std::error::Error for DriverError {}

pub type DriverResult<T> = Result<T, DriverError>;

impl From<WireError> for DriverError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Malformed(_) | WireError::UnexpectedTag(_) => DriverError::bad_response(err.to_string()),
            WireError::NotConnected => DriverError::Communication { code: codes::CONNECTION_SERVER_NOT_REACHED, message: err.to_string() },
            WireError::BadMoniker(_) => DriverError::configuration(err.to_string()),
            _ => DriverError::Communication { code: codes::CONNECTION_COULD_NOT_RECEIVE, message: err.to_string() },
        }
    }
}
