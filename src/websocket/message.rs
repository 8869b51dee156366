use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "message")]
    Message(serde_json::Value),
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "broadcast")]
    Broadcast {
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        payload: serde_json::Value,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_room(room_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Broadcast {
            room_id: Some(room_id.into()),
            payload,
        }
    }

    pub fn direct(payload: serde_json::Value) -> Self {
        Self::Broadcast {
            room_id: None,
            payload,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
