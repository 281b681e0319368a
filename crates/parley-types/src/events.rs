use serde::{Deserialize, Serialize};

use crate::api::MessageKind;

/// Outcome field carried by login/register responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Fail,
}

// -- Channel variant (broadcast room, socket-event auth) --

/// Commands sent FROM client TO server on the channel gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelCommand {
    /// Authenticate this connection; gated by the login throttle.
    Login { user: String, pass: String },

    /// Create a channel account.
    Register { user: String, pass: String },

    /// Post a message to the channel.
    Message { body: String },

    /// Indicate typing; relayed to everyone but the sender.
    Typing,
}

/// Events sent FROM server TO client on the channel gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChannelEvent {
    LoginResponse {
        status: ResponseStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
    },

    RegisterResponse {
        status: ResponseStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
    },

    /// A channel message — live broadcast or history replay.
    Message {
        user: String,
        body: String,
        time: String,
    },

    DisplayTyping { user: String },
}

// -- Direct variant (1:1 rooms, JWT-authenticated upgrade) --

/// Commands sent FROM client TO server on the direct gateway. The sender
/// identity always comes from the authenticated upgrade, never the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DirectCommand {
    /// Subscribe to the pair room shared with `partner`.
    JoinPrivate { partner: String },

    /// Send a private message; persisted whether or not anyone is listening.
    Message {
        recipient: String,
        body: String,
        #[serde(default = "default_kind")]
        kind: MessageKind,
    },

    /// Indicate typing to `recipient`'s pair room.
    Typing { recipient: String },
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

/// Events sent FROM server TO client on the direct gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DirectEvent {
    /// New message delivered to the pair room.
    NewMessage {
        sender: String,
        recipient: String,
        body: String,
        kind: MessageKind,
        timestamp: f64,
    },

    IsTyping { sender: String, recipient: String },

    /// A user came online or went offline; broadcast to all connections.
    StatusChange { user: String, status: PresenceStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_command_wire_shape() {
        let cmd: ChannelCommand = serde_json::from_str(
            r#"{"type":"Login","data":{"user":"alice","pass":"hunter22"}}"#,
        )
        .unwrap();
        match cmd {
            ChannelCommand::Login { user, pass } => {
                assert_eq!(user, "alice");
                assert_eq!(pass, "hunter22");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn direct_message_defaults_to_text() {
        let cmd: DirectCommand = serde_json::from_str(
            r#"{"type":"Message","data":{"recipient":"bob","body":"hi"}}"#,
        )
        .unwrap();
        match cmd {
            DirectCommand::Message { kind, .. } => assert_eq!(kind, MessageKind::Text),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn login_response_omits_empty_msg() {
        let json = serde_json::to_string(&ChannelEvent::LoginResponse {
            status: ResponseStatus::Success,
            msg: None,
        })
        .unwrap();
        assert!(!json.contains("msg"));
        assert!(json.contains("success"));
    }
}
