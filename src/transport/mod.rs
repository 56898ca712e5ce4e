//! Byte-stream transport consumed by the connection and the tuple decoder.
//! Everything here is synchronous and blocking; a stalled peer blocks the caller.
//! Integers on the wire are network byte order.

use thiserror::Error;

mod memory;
mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport is not connected")]
    NotConnected,
    #[error("unsupported integer width {0}")]
    BadWidth(usize),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unexpected message tag 0x{0:02X}")]
    UnexpectedTag(u8),
    #[error("invalid transport moniker '{0}'")]
    BadMoniker(String),
}

pub type WireResult<T> = Result<T, WireError>;

/// A session with the gateway. Implementations only need the raw byte primitives;
/// integer and string readers are provided on top of `read_exact`.
pub trait Transport: Send {
    fn connect(&mut self, moniker: &str) -> WireResult<()>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn read_exact(&mut self, buf: &mut [u8]) -> WireResult<()>;
    fn write_all(&mut self, data: &[u8]) -> WireResult<()>;
    fn flush(&mut self) -> WireResult<()>;

    /// Read a signed integer of `width` bytes (2 or 4).
    fn read_int(&mut self, width: usize) -> WireResult<i32> {
        match width {
            2 => { let mut b = [0u8; 2]; self.read_exact(&mut b)?; Ok(i16::from_be_bytes(b) as i32) }
            4 => { let mut b = [0u8; 4]; self.read_exact(&mut b)?; Ok(i32::from_be_bytes(b)) }
            w => Err(WireError::BadWidth(w)),
        }
    }

    fn read_u8(&mut self) -> WireResult<u8> { let mut b = [0u8; 1]; self.read_exact(&mut b)?; Ok(b[0]) }

    /// Read bytes up to (not including) a NUL terminator.
    fn read_cstring(&mut self) -> WireResult<String> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let byte = self.read_u8()?;
            if byte == 0 { break; }
            buf.push(byte);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Split a moniker of the form `tcp:host:port` (or bare `host:port`) into a socket address string.
pub fn tcp_address(moniker: &str) -> WireResult<String> {
    let rest = moniker.strip_prefix("tcp:").unwrap_or(moniker);
    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(format!("{}:{}", host, port)),
        _ => Err(WireError::BadMoniker(moniker.to_string())),
    }
}
