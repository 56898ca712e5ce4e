use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// One decoded cell. Non-null values keep a trailing NUL after the payload so
/// the buffer can be handed out as a C-style string; `bytes()` never includes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleField {
    data: Option<Vec<u8>>,
}

impl TupleField {
    pub fn null() -> Self { Self { data: None } }

    pub fn from_bytes(payload: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(payload.len() + 1);
        buf.extend_from_slice(payload);
        buf.push(0);
        Self { data: Some(buf) }
    }

    /// Take ownership of a buffer that already ends with the NUL terminator.
    pub(crate) fn from_terminated(buf: Vec<u8>) -> Self {
        debug_assert_eq!(buf.last(), Some(&0));
        Self { data: Some(buf) }
    }

    pub fn is_null(&self) -> bool { self.data.is_none() }

    /// Payload length, or -1 for null.
    pub fn len(&self) -> i32 {
        match &self.data { Some(b) => b.len().saturating_sub(1) as i32, None => -1 }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.data.as_deref().map(|b| &b[..b.len().saturating_sub(1)])
    }

    pub fn as_str(&self) -> Option<Cow<'_, str>> { self.bytes().map(String::from_utf8_lossy) }
}

/// Column metadata from a row description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub type_oid: i32,
    pub size: i16,
    pub modifier: i32,
    /// Longest payload seen in this column since the cache was filled.
    pub display_size: i32,
}

impl FieldInfo {
    pub fn new(name: &str, type_oid: i32, size: i16, modifier: i32) -> Self {
        Self { name: name.to_string(), type_oid, size, modifier, display_size: 0 }
    }
}

/// Wire columns of a result, hidden key columns included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    fields: Vec<FieldInfo>,
}

impl ColumnInfo {
    pub fn new(fields: Vec<FieldInfo>) -> Self { Self { fields } }
    pub fn len(&self) -> usize { self.fields.len() }
    pub fn is_empty(&self) -> bool { self.fields.is_empty() }
    pub fn get(&self, col: usize) -> Option<&FieldInfo> { self.fields.get(col) }
    pub fn iter(&self) -> std::slice::Iter<'_, FieldInfo> { self.fields.iter() }
    pub fn name(&self, col: usize) -> Option<&str> { self.fields.get(col).map(|f| f.name.as_str()) }
    pub fn display_size(&self, col: usize) -> i32 { self.fields.get(col).map(|f| f.display_size).unwrap_or(0) }

    pub fn note_width(&mut self, col: usize, len: i32) {
        if let Some(f) = self.fields.get_mut(col) {
            if f.display_size < len { f.display_size = len; }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_keeps_terminator_out_of_payload() {
        let f = TupleField::from_bytes(b"AB");
        assert_eq!(f.len(), 2);
        assert_eq!(f.bytes(), Some(&b"AB"[..]));
        assert_eq!(f.as_str().as_deref(), Some("AB"));
        let n = TupleField::null();
        assert!(n.is_null());
        assert_eq!(n.len(), -1);
        assert_eq!(TupleField::from_bytes(b"").len(), 0);
    }

    #[test]
    fn display_width_is_running_max() {
        let mut ci = ColumnInfo::new(vec![FieldInfo::new("a", 25, -1, -1)]);
        ci.note_width(0, 3);
        ci.note_width(0, 1);
        ci.note_width(5, 99);
        assert_eq!(ci.display_size(0), 3);
    }
}
