//! Server-sent-events push channel for feedsync
//!
//! This crate provides a concrete implementation of the PushChannelFactory
//! trait on top of any HttpClient that supports streaming responses.
//!
//! Blocking reads run on a dedicated pump thread that only moves raw chunks.
//! Decoding, cancellation and idle detection live in an async forwarder task,
//! so `disconnect` takes effect immediately even while a read is stuck.

use async_trait::async_trait;
use feedcore::net::{HttpClient, HttpRequest, PushChannel, PushChannelFactory, PushEvent};
use feedcore::sse::{SseDecoder, to_push_event};
use log::{debug, info, warn};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const READ_CHUNK_SIZE: usize = 4096;
const EVENT_CHANNEL_CAPACITY: usize = 100;
const CHUNK_CHANNEL_CAPACITY: usize = 16;

/// Streams that deliver nothing, not even a keepalive comment, for this long
/// are treated as dead. Servers usually ping every 15 to 30 seconds.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// What the pump thread hands to the forwarder.
enum PumpMessage {
    Opened,
    Data(Vec<u8>),
    Failed(String),
}

/// A live SSE stream.
pub struct SsePushChannel {
    cancel: watch::Sender<bool>,
}

#[async_trait]
impl PushChannel for SsePushChannel {
    async fn disconnect(&self) {
        if !self.cancel.send_replace(true) {
            debug!(target: "SseTransport", "Push channel closed by owner");
        }
    }
}

/// Factory for SSE push channels rooted at `stream_url`.
pub struct SsePushChannelFactory {
    http_client: Arc<dyn HttpClient>,
    stream_url: String,
    auth_token: Option<String>,
    idle_timeout: Duration,
}

impl SsePushChannelFactory {
    pub fn new(http_client: Arc<dyn HttpClient>, stream_url: impl Into<String>) -> Self {
        Self {
            http_client,
            stream_url: stream_url.into(),
            auth_token: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// Should exceed the server's keepalive interval.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn request_for(&self, user_id: &str) -> HttpRequest {
        let url = format!(
            "{}?userId={}",
            self.stream_url,
            urlencoding::encode(user_id)
        );
        let request = HttpRequest::get(url)
            .with_header("Accept", "text/event-stream")
            .with_header("Cache-Control", "no-cache");
        match &self.auth_token {
            Some(token) => request.with_header("Authorization", format!("Bearer {token}")),
            None => request,
        }
    }
}

#[async_trait]
impl PushChannelFactory for SsePushChannelFactory {
    async fn open(
        &self,
        user_id: &str,
    ) -> Result<(Arc<dyn PushChannel>, mpsc::Receiver<PushEvent>), anyhow::Error> {
        let request = self.request_for(user_id);
        info!(target: "SseTransport", "Opening push stream {}", request.url);

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        // A plain thread rather than the blocking pool, so a read stuck on a
        // silent socket never holds up runtime shutdown.
        let http_client = self.http_client.clone();
        std::thread::Builder::new()
            .name("sse-pump".to_string())
            .spawn(move || read_pump(http_client.as_ref(), request, &chunk_tx))?;
        tokio::spawn(forward_events(chunk_rx, event_tx, cancel_rx, self.idle_timeout));

        Ok((Arc::new(SsePushChannel { cancel: cancel_tx }), event_rx))
    }
}

/// Reads the stream until it ends or the forwarder lets go of `chunk_tx`.
/// The reader is dropped, and with it the connection, as soon as the read in
/// flight returns.
fn read_pump(http_client: &dyn HttpClient, request: HttpRequest, chunk_tx: &mpsc::Sender<PumpMessage>) {
    let mut response = match http_client.execute_streaming(request) {
        Ok(response) => response,
        Err(e) => {
            let _ = chunk_tx.blocking_send(PumpMessage::Failed(format!("connect failed: {e}")));
            return;
        }
    };
    if !(200..300).contains(&response.status_code) {
        let _ = chunk_tx.blocking_send(PumpMessage::Failed(format!(
            "stream rejected with status {}",
            response.status_code
        )));
        return;
    }
    if chunk_tx.blocking_send(PumpMessage::Opened).is_err() {
        return;
    }

    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        if chunk_tx.is_closed() {
            break;
        }
        let message = match response.body.read(&mut chunk) {
            Ok(0) => PumpMessage::Failed("stream closed by server".to_string()),
            Ok(n) => PumpMessage::Data(chunk[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => PumpMessage::Failed(format!("stream read failed: {e}")),
        };
        let finished = matches!(message, PumpMessage::Failed(_));
        if chunk_tx.blocking_send(message).is_err() || finished {
            break;
        }
    }
    debug!(target: "SseTransport", "Read pump stopped, releasing stream");
}

async fn forward_events(
    mut chunks: mpsc::Receiver<PumpMessage>,
    events: mpsc::Sender<PushEvent>,
    mut cancel: watch::Receiver<bool>,
    idle_timeout: Duration,
) {
    let mut decoder = SseDecoder::new();
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.wait_for(|closed| *closed) => {
                debug!(target: "SseTransport", "Forwarder stopped by disconnect");
                return;
            }
            received = tokio::time::timeout(idle_timeout, chunks.recv()) => received,
        };

        let message = match received {
            Err(_) => {
                warn!(target: "SseTransport", "No data on push stream for {idle_timeout:?}");
                let _ = events
                    .send(PushEvent::Error(format!("stream idle for {idle_timeout:?}")))
                    .await;
                return;
            }
            Ok(None) => {
                let _ = events
                    .send(PushEvent::Error("read pump exited".to_string()))
                    .await;
                return;
            }
            Ok(Some(message)) => message,
        };

        match message {
            PumpMessage::Opened => {
                if events.send(PushEvent::Connected).await.is_err() {
                    return;
                }
            }
            PumpMessage::Failed(reason) => {
                if !*cancel.borrow() {
                    let _ = events.send(PushEvent::Error(reason)).await;
                }
                return;
            }
            PumpMessage::Data(bytes) => {
                decoder.feed(&bytes);
                while let Some(sse_event) = decoder.decode_event() {
                    match to_push_event(&sse_event) {
                        // Already announced when the stream opened.
                        Ok(Some(PushEvent::Connected)) => {}
                        Ok(Some(event)) => {
                            if events.send(event).await.is_err() {
                                debug!(target: "SseTransport", "Event receiver dropped, stopping forwarder");
                                return;
                            }
                        }
                        Ok(None) => {
                            debug!(target: "SseTransport", "Ignoring SSE event {:?}", sse_event.event);
                        }
                        Err(e) => {
                            warn!(target: "SseTransport", "Dropping undecodable {:?} event: {e}", sse_event.event);
                        }
                    }
                }
            }
        }
    }
}
