//! Wire types for the cluster's HTTP/JSON session API.
//!
//! Field names match the cluster's JSON shapes verbatim (PascalCase), so no
//! `rename_all` blanket applies — each field is tagged individually where it
//! differs from the idiomatic Rust name.

use serde::{Deserialize, Serialize};

/// Response body of `POST /robustirc/v1/session`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionResponse {
    #[serde(rename = "Sessionid")]
    pub session_id: String,
    #[serde(rename = "Prefix")]
    pub prefix: String,
}

/// Request body of `DELETE /robustirc/v1/{sessionid}`.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteSessionRequest {
    #[serde(rename = "Quitmessage")]
    pub quit_message: String,
}

/// One object decoded from the `GET .../messages` chunked JSON stream.
///
/// `Type` selects which of the optional fields are populated; unknown type
/// tags deserialize successfully (so the stream never stalls on them) but
/// carry no usable payload and are ignored by the stream reader.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterMessage {
    #[serde(rename = "Id")]
    pub id: u64,
    #[serde(rename = "Type")]
    pub kind: MessageKind,
    #[serde(rename = "Data", default)]
    pub data: Option<String>,
    #[serde(rename = "Servers", default)]
    pub servers: Option<Vec<String>>,
    #[serde(rename = "Currentmaster", default)]
    pub current_master: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum MessageKind {
    Ping,
    #[serde(rename = "IRCToClient")]
    IrcToClient,
    #[serde(other)]
    Unknown,
}
