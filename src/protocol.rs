// ABOUTME: Wire protocol definitions for the XDS server API
// Rust counterpart to the apiv1 package exposed by the server

use serde::{Deserialize, Serialize};

/// Header carrying the client/session token on every request and on the
/// event-channel handshake.
pub const SESSION_HEADER: &str = "XDS-SID";

/// Path prefix shared by the HTTP API and the event channel.
pub const API_PREFIX: &str = "/api/v1";

/// HTTP paths, relative to [`API_PREFIX`].
pub const FOLDERS_PATH: &str = "/folders";
pub const MAKE_PATH: &str = "/make";
pub const EVENTS_PATH: &str = "/events";

/// Command timeout sent to the server. Advisory only: the server enforces
/// it, the client waits indefinitely.
pub const DEFAULT_CMD_TIMEOUT: u32 = 60;

// ============================================
// HTTP payloads
// ============================================

/// One server-managed project folder, as returned by `GET /folders`.
/// Tolerant of extra fields: the server sends sync/builder details this
/// client never looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderConfig {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub relative_path: String,
}

/// Body of `POST /make`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeArgs {
    pub id: String,
    pub rpath: String,
    pub args: String,
    #[serde(rename = "cmdTimeout")]
    pub cmd_timeout: u32,
}

// ============================================
// Event-channel payloads
// ============================================

/// One chunk of build output. At most one of stdout/stderr is non-empty
/// in practice, but both are checked independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeOutMsg {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Terminal event carrying the remote build's exit code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeExitMsg {
    pub code: i32,
    #[serde(default)]
    pub error: Option<String>,
}

/// Named events delivered on the WebSocket channel, framed as
/// `{"event": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum WireEvent {
    /// Transport-level advisory error. Logged, never terminal.
    #[serde(rename = "error")]
    Error(String),

    /// Server-initiated disconnection, with an optional reason.
    #[serde(rename = "disconnection")]
    Disconnection(Option<String>),

    #[serde(rename = "make:output")]
    MakeOutput(MakeOutMsg),

    #[serde(rename = "make:exit")]
    MakeExit(MakeExitMsg),
}
