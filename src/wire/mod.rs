//! Gateway message framing.
//!
//! Requests and responses are a one-byte tag followed by tag-specific fields;
//! only the modern query request carries a length. Tuple frames are described
//! in [`decoder`].

use tracing::debug;

use crate::protocol::ProtocolGeneration;
use crate::result::FieldInfo;
use crate::transport::{Transport, WireResult};

pub mod decoder;

pub use decoder::WireTupleDecoder;

pub mod tags {
    // client to gateway
    pub const STARTUP: u8 = b'S';
    pub const QUERY: u8 = b'Q';
    pub const TERMINATE: u8 = b'X';
    // gateway to client
    pub const AUTH_OK: u8 = b'R';
    pub const PARAMETER_STATUS: u8 = b'P';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const TEXT_ROW: u8 = b'D';
    pub const BINARY_ROW: u8 = b'B';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const NOTICE: u8 = b'N';
    pub const ERROR: u8 = b'E';
    pub const EMPTY_QUERY: u8 = b'I';
    pub const READY: u8 = b'Z';
}

/// Bytes of the length header legacy text frames count in each field length.
pub const VARHDRSZ: i32 = 4;

pub fn wire_trace_enabled() -> bool {
    std::env::var("ROWGATE_WIRE_TRACE").map(|v| {
        let s = v.to_lowercase();
        s == "1" || s == "true" || s == "yes" || s == "on"
    }).unwrap_or(false)
}

pub fn hex_dump_prefix(data: &[u8], max: usize) -> String {
    let take = data.len().min(max);
    data.iter().take(take).map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

fn push_cstring(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

pub fn encode_startup(database: &str, username: &str, password: &str) -> Vec<u8> {
    let mut buf = vec![tags::STARTUP];
    push_cstring(&mut buf, database);
    push_cstring(&mut buf, username);
    push_cstring(&mut buf, password);
    buf
}

pub fn encode_query(generation: ProtocolGeneration, sql: &str) -> Vec<u8> {
    let mut buf = vec![tags::QUERY];
    if !generation.is_legacy() {
        let len = (4 + sql.len() + 1) as i32;
        buf.extend_from_slice(&len.to_be_bytes());
    }
    push_cstring(&mut buf, sql);
    buf
}

pub fn encode_terminate() -> Vec<u8> { vec![tags::TERMINATE] }

/// Write one request and flush it.
pub fn send_request(t: &mut dyn Transport, request: &[u8]) -> WireResult<()> {
    if wire_trace_enabled() {
        debug!(target: "wire", "send tag='{}' len={} hex={}", request.first().map(|b| *b as char).unwrap_or('?'), request.len(), hex_dump_prefix(request, 64));
    }
    t.write_all(request)?;
    t.flush()
}

// ---- gateway side encoders, used by test gateways and benches ----

pub fn encode_cstring_message(tag: u8, text: &str) -> Vec<u8> {
    let mut buf = vec![tag];
    push_cstring(&mut buf, text);
    buf
}

pub fn encode_parameter_status(name: &str, value: &str) -> Vec<u8> {
    let mut buf = vec![tags::PARAMETER_STATUS];
    push_cstring(&mut buf, name);
    push_cstring(&mut buf, value);
    buf
}

pub fn encode_row_description(fields: &[FieldInfo]) -> Vec<u8> {
    let mut buf = vec![tags::ROW_DESCRIPTION];
    buf.extend_from_slice(&(fields.len() as i16).to_be_bytes());
    for f in fields {
        push_cstring(&mut buf, &f.name);
        buf.extend_from_slice(&f.type_oid.to_be_bytes());
        buf.extend_from_slice(&f.size.to_be_bytes());
        buf.extend_from_slice(&f.modifier.to_be_bytes());
    }
    buf
}

/// Frame one tuple (tag included) the way `generation` lays it out.
pub fn encode_tuple(generation: ProtocolGeneration, binary: bool, cells: &[Option<&[u8]>]) -> Vec<u8> {
    let mut buf = vec![if binary { tags::BINARY_ROW } else { tags::TEXT_ROW }];
    if generation.is_legacy() {
        let mut bitmap = vec![0u8; cells.len().div_ceil(8)];
        for (i, c) in cells.iter().enumerate() {
            if c.is_some() { bitmap[i / 8] |= 0x80 >> (i % 8); }
        }
        buf.extend_from_slice(&bitmap);
        let header = if binary { 0 } else { VARHDRSZ };
        for bytes in cells.iter().flatten() {
            buf.extend_from_slice(&(bytes.len() as i32 + header).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
    } else {
        for c in cells {
            match c {
                Some(bytes) => {
                    buf.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    buf.extend_from_slice(bytes);
                }
                None => buf.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
    }
    buf
}
