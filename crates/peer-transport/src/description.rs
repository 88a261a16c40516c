use std::fmt;

use serde::{Deserialize, Serialize};

use crate::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptionKind::Offer => f.write_str("offer"),
            DescriptionKind::Answer => f.write_str("answer"),
        }
    }
}

/// Session description produced and consumed by the transport.
///
/// Serialized as `{"type": "offer", "sdp": "..."}`. The `sdp` body is
/// opaque here; only the transport interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: DescriptionKind, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }

    pub fn to_wire(&self) -> Result<String, TransportError> {
        serde_json::to_string(self)
            .map_err(|err| TransportError::MalformedDescription(err.to_string()))
    }

    pub fn from_wire(text: &str) -> Result<Self, TransportError> {
        let description: SessionDescription = serde_json::from_str(text.trim())
            .map_err(|err| TransportError::MalformedDescription(err.to_string()))?;
        if description.sdp.trim().is_empty() {
            return Err(TransportError::MalformedDescription(
                "description carries no sdp".into(),
            ));
        }
        Ok(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_type_and_sdp_keys() {
        let description = SessionDescription::new(DescriptionKind::Answer, "v=0\r\n");
        let wire = description.to_wire().expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&wire).expect("json");
        assert_eq!(value["type"], "answer");
        assert_eq!(value["sdp"], "v=0\r\n");
        assert_eq!(SessionDescription::from_wire(&wire).expect("parse"), description);
    }

    #[test]
    fn rejects_garbage_and_empty_sdp() {
        assert!(matches!(
            SessionDescription::from_wire("not json"),
            Err(TransportError::MalformedDescription(_))
        ));
        assert!(matches!(
            SessionDescription::from_wire(r#"{"type":"offer","sdp":"  "}"#),
            Err(TransportError::MalformedDescription(_))
        ));
        assert!(matches!(
            SessionDescription::from_wire(r#"{"type":"rollback","sdp":"v=0"}"#),
            Err(TransportError::MalformedDescription(_))
        ));
    }
}
