use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

use super::retry::RetryPolicy;

/// Retrieves the raw bytes behind one image reference.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP(S) image fetcher with per-request timeout, a body size cap and
/// bounded retries for transient failures.
pub struct HttpFetcher {
    http: Client,
    max_bytes: u64,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64, retry: RetryPolicy) -> Result<Self, FetchError> {
        if timeout.is_zero() {
            return Err(FetchError::Config("fetch timeout must be positive".to_string()));
        }

        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(concat!("batch-image-compress/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;

        Ok(Self {
            http,
            max_bytes,
            retry,
        })
    }

    /// Single attempt, no retries.
    pub async fn fetch_once(&self, url: Url) -> Result<Vec<u8>, FetchError> {
        let mut response = self.http.get(url).send().await.map_err(FetchError::classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
        }

        // Stream the body so an unannounced oversized payload is cut off early.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(FetchError::classify)? {
            if body.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
        let url = parse_reference(reference)?;

        let bytes = self
            .retry
            .run("fetch", || self.fetch_once(url.clone()), FetchError::is_retryable)
            .await?;

        tracing::debug!(reference, bytes = bytes.len(), "Fetched image");
        Ok(bytes)
    }
}

/// Validate that a reference is an absolute http(s) URL.
pub fn parse_reference(reference: &str) -> Result<Url, FetchError> {
    let url = Url::parse(reference.trim())
        .map_err(|e| FetchError::InvalidRef(format!("{reference}: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidRef(format!(
            "{reference}: unsupported scheme '{other}'"
        ))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Unexpected HTTP status {0}")]
    BadStatus(u16),

    #[error("Image exceeds {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("Invalid image reference: {0}")]
    InvalidRef(String),

    #[error("Fetcher configuration error: {0}")]
    Config(String),
}

impl FetchError {
    fn classify(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::BadStatus(status.as_u16())
        } else {
            Self::Unreachable(err.to_string())
        }
    }

    /// Timeouts, connection failures, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Unreachable(_) => true,
            Self::BadStatus(code) => {
                *code == StatusCode::TOO_MANY_REQUESTS.as_u16() || (500..600).contains(code)
            }
            Self::TooLarge { .. } | Self::InvalidRef(_) | Self::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(timeout_ms: u64, max_bytes: u64, attempts: u32) -> HttpFetcher {
        HttpFetcher::new(
            Duration::from_millis(timeout_ms),
            max_bytes,
            RetryPolicy::new(attempts, Duration::from_millis(1)),
        )
        .unwrap()
    }

    #[test]
    fn test_reference_validation() {
        assert!(parse_reference("https://cdn.example.com/a.png").is_ok());
        assert!(matches!(
            parse_reference("not a url"),
            Err(FetchError::InvalidRef(_))
        ));
        assert!(matches!(
            parse_reference("ftp://example.com/a.png"),
            Err(FetchError::InvalidRef(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = HttpFetcher::new(Duration::ZERO, 1024, RetryPolicy::default());
        assert!(matches!(result, Err(FetchError::Config(_))));
    }

    #[test]
    fn test_retry_classification() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Unreachable("refused".into()).is_retryable());
        assert!(FetchError::BadStatus(503).is_retryable());
        assert!(FetchError::BadStatus(429).is_retryable());
        assert!(!FetchError::BadStatus(404).is_retryable());
        assert!(!FetchError::TooLarge { limit: 1 }.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_returns_full_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 2048]))
            .mount(&server)
            .await;

        let bytes = fetcher(2_000, 1 << 20, 1)
            .fetch(&format!("{}/img.png", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, vec![7u8; 2048]);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(2_000, 1 << 20, 3)
            .fetch(&format!("{}/missing.png", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::BadStatus(404)));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_to_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.png"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetcher(2_000, 1 << 20, 3)
            .fetch(&format!("{}/flaky.png", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::BadStatus(503)));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 16])
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let err = fetcher(100, 1 << 20, 2)
            .fetch(&format!("{}/slow.png", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huge.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let err = fetcher(2_000, 1024, 1)
            .fetch(&format!("{}/huge.png", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 1024 }));
    }
}
