use crate::client::FeedClient;
use feedcore::net::PushEvent;
use feedcore::types::ConnectionState;
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

impl FeedClient {
    /// Spawns the push loop once per client. Without a user session there is
    /// nothing to subscribe to.
    pub(crate) fn start_push(self: &Arc<Self>) {
        if !self.config.has_session() {
            warn!(target: "FeedClient/Push", "No user session, push channel not opened");
            return;
        }
        if self.push_started.swap(true, Ordering::SeqCst) {
            debug!(target: "FeedClient/Push", "Push loop already running");
            return;
        }
        let client = self.clone();
        tokio::spawn(async move { client.push_loop().await });
    }

    /// Keeps the push channel open until shutdown, reconnecting after each
    /// failure as the reconnect policy dictates. Only this task schedules
    /// reconnects, so at most one is ever pending.
    async fn push_loop(self: Arc<Self>) {
        while self.is_running() {
            self.run_push_session().await;
            if !self.is_running() {
                break;
            }

            let failures = self.reconnect_errors.fetch_add(1, Ordering::SeqCst);
            let Some(delay) = self.config.reconnect.delay_for(failures) else {
                warn!(
                    target: "FeedClient/Push",
                    "Giving up on the push channel after {failures} consecutive failures"
                );
                self.set_connection_state(ConnectionState::GaveUp);
                return;
            };

            info!(
                target: "FeedClient/Push",
                "Will attempt to reconnect in {:?} (attempt {})",
                delay,
                failures + 1
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wait_for_shutdown() => break,
            }
        }
        debug!(target: "FeedClient/Push", "Push loop has shut down.");
    }

    /// One connection lifetime: open, pump events, clean up.
    async fn run_push_session(self: &Arc<Self>) {
        self.set_connection_state(ConnectionState::Connecting);

        let opened = tokio::select! {
            opened = self.push_factory.open(&self.config.user_id) => opened,
            _ = self.wait_for_shutdown() => return,
        };
        let (channel, mut events) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(target: "FeedClient/Push", "Failed to open push channel: {e}");
                self.set_connection_state(ConnectionState::Disconnected);
                return;
            }
        };
        *self
            .push_channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(channel.clone());

        loop {
            tokio::select! {
                biased;
                _ = self.wait_for_shutdown() => {
                    debug!(target: "FeedClient/Push", "Shutdown signaled, leaving push session");
                    break;
                }
                event = events.recv() => match event {
                    Some(PushEvent::Error(reason)) => {
                        self.handle_push_event(PushEvent::Error(reason)).await;
                        break;
                    }
                    Some(event) => self.handle_push_event(event).await,
                    None => {
                        warn!(target: "FeedClient/Push", "Push channel closed without an error");
                        self.set_connection_state(ConnectionState::Disconnected);
                        break;
                    }
                },
            }
        }

        // Shutdown may already have taken and closed the channel.
        let still_ours = self
            .push_channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if still_ours {
            channel.disconnect().await;
        }
    }
}
