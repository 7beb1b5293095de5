// ABOUTME: Transport session abstractions: the synchronous request channel and
// the asynchronous event channel, plus the error and event types they share

pub mod events;
pub mod http;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{MakeExitMsg, MakeOutMsg, WireEvent};

pub use events::WsEventChannel;
pub use http::HttpClient;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP {status} for {path}")]
    Status { status: u16, path: String },

    #[error("IO.socket connection error: {0}")]
    EventConnect(String),

    #[error("invalid session token: {0}")]
    SessionToken(#[from] reqwest::header::InvalidHeaderValue),
}

/// Application-level view of the event channel. Transport close and
/// errors are folded into `Disconnected` so the orchestrator sees one
/// uniform stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Build output chunk, repeatable, never terminal.
    Output(MakeOutMsg),
    /// Remote build finished. Terminal.
    Exit(MakeExitMsg),
    /// Advisory transport error. Logged only.
    Error(String),
    /// Event channel dropped, with an optional reason. Terminal.
    Disconnected(Option<String>),
}

impl From<WireEvent> for SessionEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::Error(msg) => SessionEvent::Error(msg),
            WireEvent::Disconnection(reason) => SessionEvent::Disconnected(reason),
            WireEvent::MakeOutput(msg) => SessionEvent::Output(msg),
            WireEvent::MakeExit(msg) => SessionEvent::Exit(msg),
        }
    }
}

/// Synchronous request/response channel to the server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestChannel {
    async fn get(&self, path: &str) -> Result<Vec<u8>, TransportError>;
    async fn post_json(&self, path: &str, body: String) -> Result<(), TransportError>;
}

/// Subscription-based event channel. Subscribing connects the channel
/// and must happen before the build request is dispatched, otherwise
/// early events race the subscription and get lost.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventChannel {
    async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<SessionEvent>, TransportError>;
}
