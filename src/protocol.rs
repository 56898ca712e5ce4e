//! Protocol generation negotiated with the gateway.
//! Resolved once at connect time from the declared protocol string; every place
//! where framing differs matches on [`ProtocolGeneration`] instead of comparing
//! version numbers again.

use serde::{Deserialize, Serialize};

/// Block size used by legacy generations to bound query text.
pub const BLCKSZ: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolGeneration {
    V62,
    V63,
    V64,
    /// Modern baseline; anything not recognized as an older generation.
    V74,
}

impl ProtocolGeneration {
    /// Oldest match wins: "6.2", then "6.3", then "6.4", otherwise the modern baseline.
    pub fn resolve(protocol: Option<&str>) -> Self {
        let p = protocol.map(str::trim).unwrap_or("");
        if p.starts_with("6.2") { ProtocolGeneration::V62 }
        else if p.starts_with("6.3") { ProtocolGeneration::V63 }
        else if p.starts_with("6.4") { ProtocolGeneration::V64 }
        else { ProtocolGeneration::V74 }
    }

    /// Legacy generations frame nulls with a leading bitmap.
    pub fn is_legacy(self) -> bool { !matches!(self, ProtocolGeneration::V74) }

    pub fn version(self) -> ServerVersion {
        match self {
            ProtocolGeneration::V62 => ServerVersion::new(6, 2),
            ProtocolGeneration::V63 => ServerVersion::new(6, 3),
            ProtocolGeneration::V64 => ServerVersion::new(6, 4),
            ProtocolGeneration::V74 => ServerVersion::new(7, 4),
        }
    }

    /// Longest query text accepted; 0 means unlimited.
    pub fn max_query_len(self) -> usize {
        if self.is_legacy() { BLCKSZ } else { 0 }
    }
}

/// Negotiated version triple (major, minor, combined number).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub number: f32,
}

impl ServerVersion {
    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor, number: major as f32 + minor as f32 / 10.0 }
    }

    pub fn at_least(&self, major: u16, minor: u16) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_oldest_first() {
        assert_eq!(ProtocolGeneration::resolve(Some("6.2")), ProtocolGeneration::V62);
        assert_eq!(ProtocolGeneration::resolve(Some("6.3")), ProtocolGeneration::V63);
        assert_eq!(ProtocolGeneration::resolve(Some("6.4-1")), ProtocolGeneration::V64);
        assert_eq!(ProtocolGeneration::resolve(Some("7.4")), ProtocolGeneration::V74);
        assert_eq!(ProtocolGeneration::resolve(Some("9.6")), ProtocolGeneration::V74);
        assert_eq!(ProtocolGeneration::resolve(None), ProtocolGeneration::V74);
    }

    #[test]
    fn version_triples() {
        let v = ProtocolGeneration::V63.version();
        assert_eq!((v.major, v.minor), (6, 3));
        assert!((v.number - 6.3).abs() < 1e-6);
        assert_eq!(ProtocolGeneration::V74.version().to_string(), "7.4");
        assert!(ProtocolGeneration::V74.version().at_least(7, 3));
        assert!(!ProtocolGeneration::V64.version().at_least(7, 3));
    }

    #[test]
    fn legacy_and_query_limits() {
        assert!(ProtocolGeneration::V62.is_legacy());
        assert!(!ProtocolGeneration::V74.is_legacy());
        assert_eq!(ProtocolGeneration::V64.max_query_len(), BLCKSZ);
        assert_eq!(ProtocolGeneration::V74.max_query_len(), 0);
    }
}
