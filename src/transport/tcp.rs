use std::io::{BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use tracing::debug;

use super::{tcp_address, Transport, WireError, WireResult};

/// Blocking TCP session to the gateway.
#[derive(Default)]
pub struct TcpTransport {
    reader: Option<BufReader<TcpStream>>,
    writer: Option<BufWriter<TcpStream>>,
    peer: String,
}

impl TcpTransport {
    pub fn new() -> Self { Self::default() }

    pub fn peer(&self) -> &str { &self.peer }
}

impl Transport for TcpTransport {
    fn connect(&mut self, moniker: &str) -> WireResult<()> {
        let addr = tcp_address(moniker)?;
        let stream = TcpStream::connect(&addr)?;
        stream.set_nodelay(true)?;
        let write_half = stream.try_clone()?;
        debug!(target: "wire", "tcp transport connected to {}", addr);
        self.reader = Some(BufReader::new(stream));
        self.writer = Some(BufWriter::new(write_half));
        self.peer = addr;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut w) = self.writer.take() { let _ = w.flush(); }
        if let Some(r) = self.reader.take() { let _ = r.get_ref().shutdown(std::net::Shutdown::Both); }
        if !self.peer.is_empty() { debug!(target: "wire", "tcp transport to {} closed", self.peer); }
        self.peer.clear();
    }

    fn is_open(&self) -> bool { self.reader.is_some() }

    fn read_exact(&mut self, buf: &mut [u8]) -> WireResult<()> {
        let r = self.reader.as_mut().ok_or(WireError::NotConnected)?;
        r.read_exact(buf)?;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> WireResult<()> {
        let w = self.writer.as_mut().ok_or(WireError::NotConnected)?;
        w.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> WireResult<()> {
        let w = self.writer.as_mut().ok_or(WireError::NotConnected)?;
        w.flush()?;
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) { self.close(); }
}
