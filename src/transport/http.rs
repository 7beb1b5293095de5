// ABOUTME: HTTP request channel to the XDS server
// Captures the XDS-SID session token from the first response and replays it afterwards

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use reqwest::{RequestBuilder, Response};
use tokio::sync::RwLock;
use tracing::debug;

use super::{RequestChannel, TransportError};
use crate::protocol::{API_PREFIX, SESSION_HEADER};

/// Session token slot shared between the HTTP client (which fills it)
/// and the event channel (which replays it on its handshake).
pub type SessionToken = Arc<RwLock<Option<String>>>;

pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
    session: SessionToken,
}

impl HttpClient {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// Handle on the session token, for the event channel.
    pub fn session(&self) -> SessionToken {
        self.session.clone()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    async fn with_session(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.read().await.as_deref() {
            Some(sid) => request.header(SESSION_HEADER, sid),
            None => request,
        }
    }

    /// The server issues the client its session ID in a response header;
    /// remember it so every later call carries it.
    async fn remember_session(&self, response: &Response) {
        if let Some(sid) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v: &HeaderValue| v.to_str().ok())
        {
            let mut slot = self.session.write().await;
            if slot.as_deref() != Some(sid) {
                debug!("session id: {sid}");
                *slot = Some(sid.to_string());
            }
        }
    }

    fn check_status(path: &str, response: &Response) -> Result<(), TransportError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            })
        }
    }
}

#[async_trait]
impl RequestChannel for HttpClient {
    async fn get(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let url = self.endpoint(path);
        debug!("GET {url}");
        let request = self.with_session(self.client.get(&url)).await;
        let response = request.send().await?;
        self.remember_session(&response).await;
        Self::check_status(path, &response)?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn post_json(&self, path: &str, body: String) -> Result<(), TransportError> {
        let url = self.endpoint(path);
        debug!("POST {url} {body}");
        let request = self
            .with_session(
                self.client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json"),
            )
            .await;
        let response = request.body(body).send().await?;
        self.remember_session(&response).await;
        Self::check_status(path, &response)
    }
}
