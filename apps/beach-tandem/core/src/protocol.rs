//! JSON frames exchanged with browser clients. Frames are internally tagged by
//! `type` so the gateway can decode every inbound frame with one `serde` call.

use serde::{Deserialize, Serialize};

/// Payload of the `connect` event. The key is optional on the wire; the engine
/// decides what a missing key means.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPayload {
    #[serde(default)]
    pub public_key: Option<String>,
}

impl ConnectPayload {
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            public_key: Some(key.into()),
        }
    }
}

/// Payload of the inbound `chat` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub message: Option<String>,
}

impl ChatPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

/// Frames sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Connect(ConnectPayload),
    Chat(ChatPayload),
}

/// Frames sent from the relay to exactly one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Pairing completed; carries the partner's public key.
    Connected { public_key: String },
    /// Opaque message relayed from the partner.
    Chat { message: String },
    PartnerDisconnected,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::Chat { .. } => "chat",
            ServerEvent::PartnerDisconnected => "partner_disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connect_without_key_decodes_to_none() {
        let event: ClientEvent = serde_json::from_value(json!({"type": "connect"})).unwrap();
        assert_eq!(event, ClientEvent::Connect(ConnectPayload::default()));
    }

    #[test]
    fn chat_without_message_still_decodes() {
        let event: ClientEvent = serde_json::from_value(json!({"type": "chat"})).unwrap();
        assert_eq!(event, ClientEvent::Chat(ChatPayload { message: None }));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let result = serde_json::from_value::<ClientEvent>(json!({"type": "join"}));
        assert!(result.is_err());
    }

    #[test]
    fn server_events_use_snake_case_tags() {
        assert_eq!(
            serde_json::to_value(ServerEvent::Connected {
                public_key: "k2".into()
            })
            .unwrap(),
            json!({"type": "connected", "public_key": "k2"})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::PartnerDisconnected).unwrap(),
            json!({"type": "partner_disconnected"})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::Chat {
                message: "hi".into()
            })
            .unwrap(),
            json!({"type": "chat", "message": "hi"})
        );
    }
}
