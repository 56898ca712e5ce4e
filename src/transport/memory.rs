use std::collections::VecDeque;
use std::sync::Arc;
use parking_lot::Mutex;

use super::{Transport, WireError, WireResult};

#[derive(Default)]
struct MemoryState {
    input: VecDeque<u8>,
    output: Vec<u8>,
    monikers: Vec<String>,
}

/// In-process transport over scripted bytes. Clones share the same buffers, so a
/// test can keep one clone to feed gateway responses and inspect the requests
/// written by the connection that owns the other.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    open: bool,
}

impl MemoryTransport {
    pub fn new() -> Self { Self::default() }

    pub fn with_input(bytes: Vec<u8>) -> Self {
        let t = Self::default();
        t.push_input(&bytes);
        t
    }

    pub fn push_input(&self, bytes: &[u8]) { self.state.lock().input.extend(bytes.iter().copied()); }

    pub fn remaining(&self) -> usize { self.state.lock().input.len() }

    /// Drain everything written so far.
    pub fn take_output(&self) -> Vec<u8> { std::mem::take(&mut self.state.lock().output) }

    pub fn monikers(&self) -> Vec<String> { self.state.lock().monikers.clone() }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, moniker: &str) -> WireResult<()> {
        self.state.lock().monikers.push(moniker.to_string());
        self.open = true;
        Ok(())
    }

    fn close(&mut self) { self.open = false; }

    fn is_open(&self) -> bool { self.open }

    fn read_exact(&mut self, buf: &mut [u8]) -> WireResult<()> {
        if !self.open { return Err(WireError::NotConnected); }
        let mut st = self.state.lock();
        if st.input.len() < buf.len() {
            let have = st.input.len();
            st.input.clear();
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("wanted {} bytes, {} available", buf.len(), have),
            )));
        }
        for b in buf.iter_mut() {
            // length checked above
            *b = st.input.pop_front().unwrap_or_default();
        }
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> WireResult<()> {
        if !self.open { return Err(WireError::NotConnected); }
        self.state.lock().output.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> WireResult<()> {
        if self.open { Ok(()) } else { Err(WireError::NotConnected) }
    }
}
