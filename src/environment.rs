//! Process-level environment handle holding the connection table.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::connection::{ConnStatus, Connection, BUSY_MESSAGE};
use crate::error::{DriverError, DriverResult};

pub const MAX_CONNECTIONS: usize = 128;

#[derive(Debug, Default)]
pub struct Environment {
    conns: Mutex<Vec<Option<Arc<Connection>>>>,
}

impl Environment {
    pub fn new() -> Self { Self::default() }

    /// Create a connection in the first free slot.
    pub fn alloc_connection(&self) -> DriverResult<Arc<Connection>> {
        let mut conns = self.conns.lock();
        let slot = match conns.iter().position(Option::is_none) {
            Some(i) => i,
            None if conns.len() < MAX_CONNECTIONS => { conns.push(None); conns.len() - 1 }
            None => return Err(DriverError::allocation("Maximum number of connections exceeded.")),
        };
        let conn = Connection::create();
        conns[slot] = Some(conn.clone());
        debug!(target: "conn", "env slot {} holds conn {}", slot, conn.id());
        Ok(conn)
    }

    /// Destroy `conn` and free its slot. Refused while it executes.
    pub fn free_connection(&self, conn: &Arc<Connection>) -> DriverResult<()> {
        if conn.status() == ConnStatus::Executing {
            return Err(DriverError::busy(BUSY_MESSAGE));
        }
        let slot = self.conns.lock().iter().position(|c| c.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)));
        let Some(slot) = slot else {
            return Err(DriverError::invalid_handle("connection does not belong to this environment"));
        };
        conn.destroy()?;
        self.conns.lock()[slot] = None;
        Ok(())
    }

    pub fn connection_count(&self) -> usize { self.conns.lock().iter().filter(|c| c.is_some()).count() }
}
