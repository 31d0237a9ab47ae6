//! WAL Record Module
//!
//! One JSON object per line; values are base64 so frames stay single-line text.

use serde::{Deserialize, Serialize};

/// Mutation carried by a WAL record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalOp {
    Set {
        key: String,
        #[serde(with = "base64_bytes")]
        value: Vec<u8>,
        /// TTL in seconds, 0 = no expiry
        ttl: u64,
    },
    Delete {
        key: String,
    },
    Clear,
}

impl WalOp {
    pub fn key(&self) -> Option<&str> {
        match self {
            WalOp::Set { key, .. } | WalOp::Delete { key } => Some(key),
            WalOp::Clear => None,
        }
    }
}

/// A sequenced, timestamped WAL frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub sequence: u64,
    /// Unix milliseconds at which the mutation was applied
    pub timestamp: u64,
    #[serde(flatten)]
    pub op: WalOp,
}

impl WalRecord {
    /// Encodes the record as a newline-terminated frame.
    pub fn to_frame(&self) -> serde_json::Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.push(b'\n');
        Ok(frame)
    }

    pub fn from_frame(line: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(line)
    }
}

/// Serde adapter storing byte buffers as standard base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
