use crate::types::NotificationItem;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An event produced by a push channel.
#[derive(Debug, Clone)]
pub enum PushEvent {
    /// The channel is (re)connected; anything sent while it was down has been missed.
    Connected,
    /// A notification was delivered by the server.
    Notification(Box<NotificationItem>),
    /// The channel failed. The owner decides whether and when to reopen it.
    Error(String),
}

/// A live push connection.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Closes the connection. No further events are delivered afterwards.
    async fn disconnect(&self);
}

/// Opens push channels for a user.
#[async_trait]
pub trait PushChannelFactory: Send + Sync {
    /// Opens a new channel and returns it, along with a stream of events.
    async fn open(
        &self,
        user_id: &str,
    ) -> Result<(Arc<dyn PushChannel>, mpsc::Receiver<PushEvent>)>;
}

/// A simple structure to represent an HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: String, // "GET", "PUT" or "DELETE"
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    fn with_method(method: &str, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.to_string(),
            headers: HashMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::with_method("GET", url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::with_method("PUT", url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::with_method("DELETE", url)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// A simple structure for the HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A response whose body is read incrementally, used for long-lived streams.
pub struct StreamingHttpResponse {
    pub status_code: u16,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for StreamingHttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingHttpResponse")
            .field("status_code", &self.status_code)
            .field("body", &"<streaming reader>")
            .finish()
    }
}

/// Trait for executing HTTP requests in a runtime-agnostic way
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Executes a given HTTP request and returns the buffered response.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Executes a request and returns the body as a blocking reader.
    /// Must be called from a context where blocking is allowed.
    fn execute_streaming(&self, request: HttpRequest) -> Result<StreamingHttpResponse> {
        let _ = request;
        Err(anyhow::anyhow!("streaming is not supported by this client"))
    }
}
