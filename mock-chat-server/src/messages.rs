use serde::{Deserialize, Serialize};

/// Message type tags shared with clients
pub const UNKNOWN_MESSAGE: i64 = 0;
pub const TEXT_MESSAGE: i64 = 1;

/// Body of a websocket frame or `POST /messages` request
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(rename = "type", default)]
    pub msg_type: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub is_me: bool,
}

/// Message pushed to every listener
#[derive(Debug, Serialize, PartialEq)]
pub struct OutgoingMessage {
    pub id: u64,
    #[serde(rename = "type")]
    pub msg_type: i64,
    pub message: String,
    pub user: User,
}

impl OutgoingMessage {
    /// The copy of a broadcast seen by `recipient_id`
    pub fn for_recipient(id: u64, message: &str, from_user_id: i64, recipient_id: i64) -> Self {
        Self {
            id,
            msg_type: TEXT_MESSAGE,
            message: message.to_string(),
            user: User {
                id: from_user_id,
                is_me: recipient_id == from_user_id,
            },
        }
    }
}
