use serde::Serialize;

use crate::track::Track;

/// Messages sent from the relay to the subscriber.  Nothing is expected back
/// on this channel.
///
/// Wire shape (one JSON text frame each):
///
/// ```text
///   {"type":"update","payload":{"name":…,"artist":…,"album":…,"artwork":…,"id":…},"auth":…}
///   {"type":"heartbeat"}
/// ```
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Update { payload: TrackPayload, auth: String },
    /// Idle keepalive.  Carries no auth; the server must not treat it as
    /// re-authentication.
    Heartbeat,
}

/// Track fields as they appear on the wire.  Field order is the encoding
/// order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackPayload {
    pub name: String,
    pub artist: String,
    pub album: String,
    /// Base64 image bytes.
    pub artwork: String,
    pub id: Option<String>,
}

impl From<&Track> for TrackPayload {
    fn from(track: &Track) -> Self {
        Self {
            name: track.name().to_string(),
            artist: track.artist().to_string(),
            album: track.album().to_string(),
            artwork: track.artwork().to_string(),
            id: track.id().map(str::to_string),
        }
    }
}

impl OutboundMessage {
    pub fn update(track: &Track, token: &str) -> Self {
        OutboundMessage::Update {
            payload: TrackPayload::from(track),
            auth: token.to_string(),
        }
    }

    pub fn heartbeat() -> Self {
        OutboundMessage::Heartbeat
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Update { .. } => "update",
            OutboundMessage::Heartbeat => "heartbeat",
        }
    }

    /// Serialise to the UTF-8 JSON text of one frame.
    pub fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artwork::RawArtwork;
    use crate::track::Snapshot;
    use serde_json::Value;
    use std::sync::Arc;

    fn track(id: Option<&str>) -> Track {
        Snapshot::new("A", "X", "Z", id.map(String::from), RawArtwork::Missing)
            .into_track(Arc::from("aWNvbg=="))
    }

    #[test]
    fn test_heartbeat_shape() {
        let encoded = OutboundMessage::heartbeat().encode().unwrap();
        assert_eq!(encoded, r#"{"type":"heartbeat"}"#);
    }

    #[test]
    fn test_update_shape_is_deterministic() {
        let msg = OutboundMessage::update(&track(Some("1")), "secret");
        let encoded = msg.encode().unwrap();
        assert_eq!(
            encoded,
            r#"{"type":"update","payload":{"name":"A","artist":"X","album":"Z","artwork":"aWNvbg==","id":"1"},"auth":"secret"}"#
        );
        assert_eq!(encoded, msg.encode().unwrap());
    }

    #[test]
    fn test_update_without_id_sends_null() {
        let encoded = OutboundMessage::update(&track(None), "t").encode().unwrap();
        let v: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(v["type"], "update");
        assert!(v["payload"]["id"].is_null());
        assert_eq!(v["auth"], "t");
    }

    #[test]
    fn test_special_characters_are_escaped() {
        let t = Snapshot::new(
            "Say \"Hi\"",
            "Björk",
            "Line\nBreak",
            None,
            RawArtwork::Missing,
        )
        .into_track(Arc::from(""));
        let encoded = OutboundMessage::update(&t, "").encode().unwrap();
        let v: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(v["payload"]["name"], "Say \"Hi\"");
        assert_eq!(v["payload"]["artist"], "Björk");
        assert_eq!(v["payload"]["album"], "Line\nBreak");
    }
}
