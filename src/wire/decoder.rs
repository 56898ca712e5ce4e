//! Tuple frame decoding.
//!
//! Legacy generations send a null bitmap of `ceil(cols / 8)` bytes, most
//! significant bit first, a set bit meaning "not null", followed by an `i32`
//! length and the payload for each non-null column. Text frames count the
//! 4-byte length header in that length. The modern generation sends an `i32`
//! length per column, negative for null. Hidden identity columns follow the
//! visible ones and land in the keyset.

use tracing::{trace, warn};

use crate::error::{DriverError, DriverResult};
use crate::protocol::ProtocolGeneration;
use crate::result::{ColumnInfo, FieldInfo, KeySet, ResultCache, ResultStatus, TupleField};
use crate::transport::{Transport, WireError};

use super::VARHDRSZ;

/// Message recorded on a result whose tuple could not be read.
pub const TUPLE_READ_ERROR: &str = "Error reading the tuple";

/// Largest single field accepted from the wire.
pub const MAX_FIELD_LEN: i32 = 1 << 30;

/// Field payloads are read in pieces of at most this size.
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct WireTupleDecoder {
    generation: ProtocolGeneration,
}

impl WireTupleDecoder {
    pub fn new(generation: ProtocolGeneration) -> Self { Self { generation } }

    pub fn generation(&self) -> ProtocolGeneration { self.generation }

    /// Read one tuple frame (tag already consumed) into `cache`. On failure the
    /// row is dropped whole, the cache is marked BadResponse and the error is returned.
    pub fn read_tuple(&self, t: &mut dyn Transport, cache: &mut ResultCache, binary: bool) -> DriverResult<()> {
        match self.decode_frame(t, cache, binary) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(target: "qresult", "tuple decode failed: {}", e);
                cache.set_status(ResultStatus::BadResponse);
                cache.set_message(Some(TUPLE_READ_ERROR));
                Err(e)
            }
        }
    }

    fn decode_frame(&self, t: &mut dyn Transport, cache: &mut ResultCache, binary: bool) -> DriverResult<()> {
        let wire_cols = cache.wire_field_count();
        let visible = cache.num_fields();
        let legacy = self.generation.is_legacy();

        let mut bitmap = vec![0u8; if legacy { wire_cols.div_ceil(8) } else { 0 }];
        if legacy { t.read_exact(&mut bitmap)?; }

        let mut values: Vec<TupleField> = Vec::with_capacity(visible);
        let mut key = KeySet::default();
        for col in 0..wire_cols {
            let present = !legacy || bitmap[col / 8] & (0x80 >> (col % 8)) != 0;
            let payload = if present { self.read_field(t, binary)? } else { None };
            if col < visible {
                values.push(payload.map(TupleField::from_terminated).unwrap_or_default());
            } else if let Some(buf) = payload {
                let text = String::from_utf8_lossy(&buf[..buf.len() - 1]);
                if col == visible { key.set_tid(&text); } else { key.set_oid(&text); }
            }
        }
        trace!(target: "qresult", "decoded tuple of {} columns ({} visible)", wire_cols, visible);
        cache.commit_row(values, key)
    }

    /// One length-prefixed field, returned with its NUL terminator appended.
    fn read_field(&self, t: &mut dyn Transport, binary: bool) -> DriverResult<Option<Vec<u8>>> {
        let mut len = t.read_int(4)?;
        if !self.generation.is_legacy() {
            if len < 0 { return Ok(None); }
        } else if !binary {
            len -= VARHDRSZ;
        }
        if !(0..=MAX_FIELD_LEN).contains(&len) {
            return Err(WireError::Malformed(format!("field length {}", len)).into());
        }
        // grow with the bytes that actually arrive, not with the declared length
        let len = len as usize;
        let mut buf = Vec::with_capacity(len.min(READ_CHUNK) + 1);
        while buf.len() < len {
            let start = buf.len();
            buf.resize(start + (len - start).min(READ_CHUNK), 0);
            t.read_exact(&mut buf[start..])?;
        }
        buf.push(0);
        Ok(Some(buf))
    }
}

/// Read a row description body (tag already consumed).
pub fn read_row_description(t: &mut dyn Transport) -> DriverResult<ColumnInfo> {
    let count = t.read_int(2)?;
    if count < 0 {
        return Err(DriverError::from(WireError::Malformed(format!("field count {}", count))));
    }
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = t.read_cstring()?;
        let type_oid = t.read_int(4)?;
        let size = t.read_int(2)? as i16;
        let modifier = t.read_int(4)?;
        fields.push(FieldInfo::new(&name, type_oid, size, modifier));
    }
    Ok(ColumnInfo::new(fields))
}

#[cfg(test)]
#[path = "decoder_tests.rs"]
mod decoder_tests;
