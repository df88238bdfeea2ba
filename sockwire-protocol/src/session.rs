//! Serialized session model shared by client and server.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single session info value.
///
/// Explicit recursive variant type rather than raw JSON values, so session
/// info survives serialization with its structure intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoValue {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<InfoValue>),
    Map(BTreeMap<String, InfoValue>),
}

impl From<bool> for InfoValue {
    fn from(v: bool) -> Self {
        InfoValue::Bool(v)
    }
}

impl From<f64> for InfoValue {
    fn from(v: f64) -> Self {
        InfoValue::Number(v)
    }
}

impl From<&str> for InfoValue {
    fn from(v: &str) -> Self {
        InfoValue::String(v.to_string())
    }
}

impl From<String> for InfoValue {
    fn from(v: String) -> Self {
        InfoValue::String(v)
    }
}

/// Session info attached by the application at session creation.
pub type SessionInfo = BTreeMap<String, InfoValue>;

/// The wire representation of a session.
///
/// Carried in the session-created notification body and in the payload of
/// a successful restore-session reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque server-generated session key.
    pub key: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub creation_ms: u64,
    /// Last lookup time, milliseconds since the Unix epoch.
    pub last_lookup_ms: u64,
    /// Application-defined session info.
    #[serde(default)]
    pub info: SessionInfo,
}

impl SessionRecord {
    /// Parses a serialized session record.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Serializes the record for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> SessionInfo {
        let mut info = SessionInfo::new();
        info.insert("username".to_string(), "sam".into());
        info.insert("admin".to_string(), true.into());
        info.insert("quota".to_string(), 42.0.into());
        info.insert(
            "groups".to_string(),
            InfoValue::List(vec!["ops".into(), "dev".into()]),
        );
        let mut nested = BTreeMap::new();
        nested.insert("theme".to_string(), InfoValue::String("dark".to_string()));
        info.insert("prefs".to_string(), InfoValue::Map(nested));
        info
    }

    #[test]
    fn test_record_roundtrip() {
        let record = SessionRecord {
            key: "k-1234".to_string(),
            creation_ms: 1_700_000_000_000,
            last_lookup_ms: 1_700_000_100_000,
            info: sample_info(),
        };
        let bytes = record.to_bytes().unwrap();
        assert_eq!(SessionRecord::parse(&bytes).unwrap(), record);
    }

    #[test]
    fn test_record_without_info_defaults_empty() {
        let body = br#"{"key":"k","creation_ms":1,"last_lookup_ms":2}"#;
        let record = SessionRecord::parse(body).unwrap();
        assert!(record.info.is_empty());
    }

    #[test]
    fn test_info_value_json_shapes() {
        let info = sample_info();
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"admin\":true"));
        assert!(json.contains("\"quota\":42.0"));
        assert!(json.contains("\"groups\":[\"ops\",\"dev\"]"));
        assert!(json.contains("\"prefs\":{\"theme\":\"dark\"}"));
    }

    #[test]
    fn test_malformed_record_rejected() {
        assert!(SessionRecord::parse(b"not json").is_err());
        assert!(SessionRecord::parse(b"{}").is_err());
    }
}
