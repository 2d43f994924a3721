use anyhow::Result;
use async_trait::async_trait;
use feedcore::net::{HttpClient, HttpRequest, HttpResponse, StreamingHttpResponse};
use log::trace;
use std::collections::HashMap;
use std::time::Duration;
use ureq::{Agent, RequestBuilder};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for the status line and headers. Body reads are not bounded
/// here since the push stream stays open indefinitely; the SSE transport
/// watches for idle streams itself.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client implementation using `ureq` for synchronous HTTP requests.
/// Since `ureq` is blocking, buffered requests are wrapped in `tokio::task::spawn_blocking`.
#[derive(Debug, Clone)]
pub struct UreqHttpClient {
    agent: Agent,
}

impl UreqHttpClient {
    pub fn new() -> Self {
        // Non-2xx statuses are returned as responses so callers can map them.
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .timeout_recv_response(Some(RESPONSE_TIMEOUT))
            .build();
        Self {
            agent: Agent::new_with_config(config),
        }
    }
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn with_headers<B>(mut req: RequestBuilder<B>, headers: &HashMap<String, String>) -> RequestBuilder<B> {
    for (key, value) in headers {
        req = req.header(key, value);
    }
    req
}

fn send(agent: &Agent, request: HttpRequest) -> Result<ureq::http::Response<ureq::Body>> {
    trace!(target: "UreqHttpClient", "--> {} {}", request.method, request.url);
    let response = match request.method.as_str() {
        "GET" => with_headers(agent.get(&request.url), &request.headers).call()?,
        "DELETE" => with_headers(agent.delete(&request.url), &request.headers).call()?,
        "PUT" => with_headers(agent.put(&request.url), &request.headers).send_empty()?,
        method => {
            return Err(anyhow::anyhow!("Unsupported HTTP method: {}", method));
        }
    };
    Ok(response)
}

#[async_trait]
impl HttpClient for UreqHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let agent = self.agent.clone();
        // Since ureq is blocking, we must use spawn_blocking
        tokio::task::spawn_blocking(move || {
            let response = send(&agent, request)?;
            let status_code = response.status().as_u16();

            let mut body = response.into_body();
            let body_bytes = body.read_to_vec()?;

            Ok(HttpResponse {
                status_code,
                body: body_bytes,
            })
        })
        .await?
    }

    fn execute_streaming(&self, request: HttpRequest) -> Result<StreamingHttpResponse> {
        // Called from inside a blocking thread by the push transport, so no
        // spawn_blocking here.
        let response = send(&self.agent, request)?;
        let status_code = response.status().as_u16();
        let reader = response.into_body().into_reader();

        Ok(StreamingHttpResponse {
            status_code,
            body: Box::new(reader),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_feed_verbs_are_sent() {
        let client = UreqHttpClient::new();
        let request = HttpRequest {
            url: "http://127.0.0.1:9/notifications".to_string(),
            method: "POST".to_string(),
            headers: HashMap::new(),
        };
        let err = send(&client.agent, request).expect_err("POST is not a feed verb");
        assert!(err.to_string().contains("Unsupported HTTP method: POST"));
    }
}
