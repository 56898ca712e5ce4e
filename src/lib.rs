//! rowgate: client-side driver core for a row-oriented database gateway.
//!
//! Connections own statement and descriptor handle tables; statements own a
//! chain of [`result::ResultCache`]s filled by the [`wire::WireTupleDecoder`].

pub mod error;
pub mod config;
pub mod protocol;
pub mod transport;
pub mod wire;
pub mod result;
pub mod connection;
pub mod statement;
pub mod descriptor;
pub mod environment;
pub mod cli;

pub use config::ConnSettings;
pub use connection::{ConnStatus, Connection};
pub use descriptor::{Descriptor, DescriptorKind};
pub use environment::Environment;
pub use error::{DriverError, DriverResult};
pub use result::{CacheState, ResultCache, ResultStatus};
pub use statement::{Statement, StatementOptions};

// Test-only printing helper: expands to tprintln! during tests and is absent otherwise.
// Usage in tests: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In non-test builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
