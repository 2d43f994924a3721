use async_trait::async_trait;
use feedcore::api::{DeleteOutcome, NotificationApi};
use feedcore::error::{ApiError, Result};
use feedcore::net::{HttpClient, HttpRequest, HttpResponse};
use feedcore::types::{NotificationId, Page, PageRequest};
use log::debug;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
#[serde(untagged)]
enum UnreadCountBody {
    Bare(u64),
    Wrapped {
        #[serde(alias = "unreadCount")]
        count: u64,
    },
}

#[derive(Deserialize)]
struct MessageBody {
    message: Option<String>,
}

/// [`NotificationApi`] over the LMS REST endpoints.
pub struct RestNotificationApi {
    http_client: Arc<dyn HttpClient>,
    api_root: String,
    auth_token: Option<String>,
}

impl RestNotificationApi {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: &str) -> Self {
        Self {
            http_client,
            api_root: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/notifications{}", self.api_root, path)
    }

    fn item_url(&self, id: &NotificationId, suffix: &str) -> String {
        self.url(&format!("/{}{}", urlencoding::encode(id.as_str()), suffix))
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = match &self.auth_token {
            Some(token) => request.with_header("Authorization", format!("Bearer {token}")),
            None => request,
        }
        .with_header("Accept", "application/json");

        debug!(target: "FeedClient/Api", "--> {} {}", request.method, request.url);
        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            return Err(ApiError::Status {
                code: response.status_code,
                body: response.body_text(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl NotificationApi for RestNotificationApi {
    async fn fetch_unread_count(&self) -> Result<u64> {
        let response = self.send(HttpRequest::get(self.url("/unread-count"))).await?;
        let count = match serde_json::from_slice::<UnreadCountBody>(&response.body)? {
            UnreadCountBody::Bare(count) | UnreadCountBody::Wrapped { count } => count,
        };
        Ok(count)
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page> {
        let url = format!(
            "{}?page={}&size={}&unreadOnly={}&sortBy={}&sortDir={}",
            self.url(""),
            request.page,
            request.size,
            request.unread_only,
            urlencoding::encode(&request.sort_by),
            request.sort_dir.as_str()
        );
        let response = self.send(HttpRequest::get(url)).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<()> {
        self.send(HttpRequest::put(self.item_url(id, "/read"))).await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<()> {
        self.send(HttpRequest::put(self.url("/read-all"))).await?;
        Ok(())
    }

    async fn delete(&self, id: &NotificationId) -> Result<DeleteOutcome> {
        let response = self.send(HttpRequest::delete(self.item_url(id, ""))).await?;
        let text = response.body_text();
        let text = text.trim();
        if text.is_empty() {
            return Ok(DeleteOutcome::default());
        }
        let message = match serde_json::from_str::<MessageBody>(text) {
            Ok(body) => body.message,
            Err(_) => Some(text.to_string()),
        };
        Ok(DeleteOutcome { message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedHttpClient;
    use feedcore::types::FeedFilter;

    fn api(http: &Arc<ScriptedHttpClient>) -> RestNotificationApi {
        RestNotificationApi::new(http.clone(), "https://lms.example/api/")
            .with_auth_token(Some("t0k".to_string()))
    }

    #[tokio::test]
    async fn test_fetch_page_builds_query_and_decodes() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.respond(
            200,
            r#"{"content":[{"id":3,"createdAt":"2024-02-02T10:00:00Z","isRead":false}],
                "totalElements":1,"totalPages":1}"#,
        );

        let page = api(&http)
            .fetch_page(PageRequest::new(2, 10, FeedFilter::UnreadOnly))
            .await
            .expect("page should load");

        assert_eq!(page.items.len(), 1);
        let requests = http.requests();
        assert_eq!(requests[0].method, "GET");
        assert_eq!(
            requests[0].url,
            "https://lms.example/api/notifications?page=2&size=10&unreadOnly=true&sortBy=createdAt&sortDir=desc"
        );
        assert_eq!(
            requests[0].headers.get("Authorization").map(String::as_str),
            Some("Bearer t0k")
        );
    }

    #[tokio::test]
    async fn test_unread_count_accepts_bare_and_wrapped() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.respond(200, "4");
        http.respond(200, r#"{"unreadCount": 9}"#);

        let api = api(&http);
        assert_eq!(api.fetch_unread_count().await.expect("bare"), 4);
        assert_eq!(api.fetch_unread_count().await.expect("wrapped"), 9);
        assert_eq!(
            http.requests()[0].url,
            "https://lms.example/api/notifications/unread-count"
        );
    }

    #[tokio::test]
    async fn test_mutations_use_expected_verbs() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.respond(200, "");
        http.respond(204, "");
        http.respond(200, r#"{"message":"Notification deleted"}"#);

        let api = api(&http);
        let id = NotificationId::from("a/b");
        api.mark_read(&id).await.expect("mark read");
        api.mark_all_read().await.expect("mark all");
        let outcome = api.delete(&id).await.expect("delete");

        assert_eq!(outcome.message.as_deref(), Some("Notification deleted"));
        let calls: Vec<_> = http
            .requests()
            .into_iter()
            .map(|r| format!("{} {}", r.method, r.url))
            .collect();
        assert_eq!(
            calls,
            [
                "PUT https://lms.example/api/notifications/a%2Fb/read",
                "PUT https://lms.example/api/notifications/read-all",
                "DELETE https://lms.example/api/notifications/a%2Fb",
            ]
        );
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.respond(404, "Notification not found");

        let err = api(&http)
            .mark_read(&NotificationId::from(1))
            .await
            .expect_err("404 must fail");
        assert!(matches!(err, ApiError::Status { code: 404, .. }));
        assert_eq!(err.user_message(), "Notification not found");
    }

    #[tokio::test]
    async fn test_transport_failure_maps_to_network_error() {
        let http = Arc::new(ScriptedHttpClient::new());
        let err = api(&http)
            .mark_all_read()
            .await
            .expect_err("no scripted response");
        assert!(matches!(err, ApiError::Network(_)));
    }
}
