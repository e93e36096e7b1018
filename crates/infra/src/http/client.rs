use std::time::Duration;

use flagsync_common::resilience::policies::ClassifiedRetry;
use flagsync_common::resilience::{BackoffStrategy, Jitter, RetryConfig, RetryError, RetryExecutor};
use flagsync_common::{ErrorClassification, ErrorSeverity};
use flagsync_domain::{FlagSyncError, HttpConfig};
use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::debug;

use crate::errors::InfraError;

const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("flagsync/", env!("CARGO_PKG_VERSION"));

/// reqwest client that retries 5xx responses and connection failures.
///
/// Any other response, including 4xx, is handed back untouched so the API
/// clients can classify it.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryConfig,
}

impl HttpClient {
    /// Client for the definitions and auth APIs.
    pub fn from_config(config: &HttpConfig) -> Result<Self, FlagSyncError> {
        Self::build(
            Duration::from_millis(config.connection_timeout_ms),
            Some(Duration::from_millis(config.read_timeout_ms)),
            config.max_attempts,
        )
    }

    /// Client for long-lived streams: bounded connect, no overall deadline,
    /// a single attempt (reconnects are the push manager's business).
    pub fn streaming(connect_timeout: Duration) -> Result<Self, FlagSyncError> {
        Self::build(connect_timeout, None, 1)
    }

    fn build(
        connect_timeout: Duration,
        timeout: Option<Duration>,
        max_attempts: u32,
    ) -> Result<Self, FlagSyncError> {
        let mut builder =
            Client::builder().no_proxy().user_agent(USER_AGENT).connect_timeout(connect_timeout);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|err| FlagSyncError::from(InfraError::from(err)))?;

        Ok(Self {
            client,
            retry: RetryConfig {
                max_attempts: max_attempts.max(1),
                backoff: BackoffStrategy::Exponential {
                    initial_delay: DEFAULT_BASE_BACKOFF,
                    max_delay: MAX_BACKOFF,
                },
                jitter: Jitter::None,
                max_total_time: None,
            },
        })
    }

    /// Replace the first retry delay (doubling per retry).
    #[must_use]
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.retry.backoff = BackoffStrategy::Exponential { initial_delay: base, max_delay: MAX_BACKOFF };
        self
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.retry.max_attempts
    }

    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Send `request`, retrying while the failure looks transient.
    ///
    /// When every attempt hit a 5xx the last response is returned.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, FlagSyncError> {
        let executor = RetryExecutor::new(self.retry.clone(), ClassifiedRetry);
        match executor.execute(|| self.attempt(&request)).await {
            Ok(response) => Ok(response),
            Err(RetryError::AttemptsExhausted { source, .. } | RetryError::NonRetryable { source }) => {
                source.into_result()
            }
            Err(other) => Err(FlagSyncError::Internal(format!("request aborted: {other:?}"))),
        }
    }

    async fn attempt(&self, request: &RequestBuilder) -> Result<Response, Failure> {
        let request =
            request.try_clone().ok_or(Failure::Unclonable)?.build().map_err(Failure::Transport)?;
        let method = request.method().clone();
        let url = redacted(request.url());

        debug!(%method, %url, "Sending request");
        let response = self.client.execute(request).await.map_err(|err| {
            debug!(%method, %url, error = %err, "Request failed");
            Failure::Transport(err)
        })?;

        let status = response.status();
        debug!(%method, %url, %status, "Received response");
        if status.is_server_error() {
            return Err(Failure::Status(response));
        }
        Ok(response)
    }
}

/// Strip the query string: stream URLs carry the access token there.
fn redacted(url: &reqwest::Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

/// Why a single attempt did not produce a usable response
#[derive(Debug)]
enum Failure {
    Status(Response),
    Transport(reqwest::Error),
    /// Streaming bodies cannot be replayed.
    Unclonable,
}

impl Failure {
    fn into_result(self) -> Result<Response, FlagSyncError> {
        match self {
            Self::Status(response) => Ok(response),
            Self::Transport(err) => Err(InfraError::from(err).into()),
            Self::Unclonable => {
                Err(FlagSyncError::Internal("request body cannot be cloned for retries".into()))
            }
        }
    }
}

impl ErrorClassification for Failure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Status(_) => true,
            Self::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Unclonable => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Status(_) | Self::Transport(_) => ErrorSeverity::Warning,
            Self::Unclonable => ErrorSeverity::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use reqwest::StatusCode;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn retrying_client(attempts: u32) -> HttpClient {
        let config = HttpConfig { max_attempts: attempts, ..HttpConfig::default() };
        HttpClient::from_config(&config).expect("http client").with_backoff(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .expect(3)
            .mount(&server)
            .await;

        let client = retrying_client(3);
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_the_last_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        let client = retrying_client(2);
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn default_config_makes_a_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::from_config(&HttpConfig::default()).expect("http client");
        assert_eq!(client.max_attempts(), 1);
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn client_errors_are_returned_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = retrying_client(3);
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refused_connections_become_network_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = retrying_client(2);
        let result = client.send(client.request(Method::GET, format!("http://{addr}"))).await;

        match result {
            Err(FlagSyncError::Network(_)) => {}
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[test]
    fn redacts_query_strings() {
        let url = reqwest::Url::parse("https://stream.test/sse?accessToken=secret").unwrap();
        assert_eq!(redacted(&url), "https://stream.test/sse");
    }
}
