use crate::api::RestNotificationApi;
use crate::client::FeedClient;
use crate::config::FeedConfig;
use anyhow::Result;
use feedcore::api::NotificationApi;
use feedcore::net::{HttpClient, PushChannelFactory};
use feedcore::types::events::{Event, EventHandler};
use feedsync_sse_transport::SsePushChannelFactory;
use feedsync_ureq_http_client::UreqHttpClient;
use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type EventHandlerCallback =
    Arc<dyn Fn(Event, Arc<FeedClient>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Forwards bus events to an async callback. Holds the client weakly so the
/// handler does not keep an unmounted client alive.
struct CallbackEventHandler {
    client: std::sync::Weak<FeedClient>,
    callback: EventHandlerCallback,
}

impl EventHandler for CallbackEventHandler {
    fn handle_event(&self, event: &Event) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        let callback = self.callback.clone();
        let event = event.clone();
        tokio::spawn(async move {
            callback(event, client).await;
        });
    }
}

/// Assembles a [`FeedClient`]. Collaborators that are not supplied default to
/// the REST API and SSE push channel over `ureq`.
#[derive(Default)]
pub struct FeedClientBuilder {
    config: Option<FeedConfig>,
    http_client: Option<Arc<dyn HttpClient>>,
    api: Option<Arc<dyn NotificationApi>>,
    push_factory: Option<Arc<dyn PushChannelFactory>>,
    event_handler: Option<EventHandlerCallback>,
}

impl FeedClient {
    pub fn builder() -> FeedClientBuilder {
        FeedClientBuilder::default()
    }
}

impl FeedClientBuilder {
    pub fn with_config(mut self, config: FeedConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_http_client<C: HttpClient + 'static>(mut self, client: C) -> Self {
        self.http_client = Some(Arc::new(client));
        self
    }

    pub fn with_api(mut self, api: Arc<dyn NotificationApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_push_factory(mut self, factory: Arc<dyn PushChannelFactory>) -> Self {
        self.push_factory = Some(factory);
        self
    }

    pub fn on_event<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Event, Arc<FeedClient>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.event_handler = Some(Arc::new(move |event, client| {
            Box::pin(handler(event, client))
        }));
        self
    }

    pub fn build(self) -> Result<Arc<FeedClient>> {
        let config = self.config.unwrap_or_default();
        if config.page_size == 0 {
            return Err(anyhow::anyhow!("page_size must be at least 1"));
        }

        let http_client = self
            .http_client
            .unwrap_or_else(|| Arc::new(UreqHttpClient::new()) as Arc<dyn HttpClient>);
        let api = self.api.unwrap_or_else(|| {
            debug!(target: "FeedClient", "Using REST notification api at {}", config.api_root());
            Arc::new(
                RestNotificationApi::new(http_client.clone(), config.api_root())
                    .with_auth_token(config.auth_token.clone()),
            ) as Arc<dyn NotificationApi>
        });
        let push_factory = self.push_factory.unwrap_or_else(|| {
            Arc::new(
                SsePushChannelFactory::new(http_client.clone(), config.stream_url())
                    .with_auth_token(config.auth_token.clone())
                    .with_idle_timeout(config.stream_idle_timeout),
            ) as Arc<dyn PushChannelFactory>
        });

        let client = FeedClient::new(config, api, push_factory);
        if let Some(callback) = self.event_handler {
            client.event_bus.add_handler(Arc::new(CallbackEventHandler {
                client: Arc::downgrade(&client),
                callback,
            }));
        }
        Ok(client)
    }
}
