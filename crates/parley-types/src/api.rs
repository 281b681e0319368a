use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// JWT claims shared between parley-api (REST middleware) and the direct
/// gateway (WebSocket upgrade auth). Canonical definition lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub username: String,
    pub token: String,
}

// -- Contacts --

#[derive(Debug, Clone, Serialize)]
pub struct UserPresence {
    pub username: String,
    pub online: bool,
}

// -- Direct history --

/// One row of direct history as returned by `GET /history/{partner}`.
#[derive(Debug, Clone, Serialize)]
pub struct DirectMessage {
    pub id: i64,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub kind: MessageKind,
    /// Unix seconds, fractional.
    pub timestamp: f64,
    pub seen: bool,
}

/// What a direct message carries. Uploads map their file extension to a
/// kind server-side; clients cannot invent new kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }

    /// Lenient mapping for rows written before kinds were constrained.
    pub fn from_db(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            "image" => Self::Image,
            _ => Self::File,
        }
    }
}

// -- Uploads --

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub kind: MessageKind,
}
