//! Parameters and Secrets extension client
//!
//! The extension listens on localhost inside the execution environment and
//! authenticates callers with the session token. Transient 400 responses are
//! common right after start-up, so those (and only those) are retried.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::SecretsConfig;
use crate::error::{Error, Result};

/// Attempts per fetch, including the first
const MAX_ATTEMPTS: u32 = 3;

/// First retry delay; doubles per attempt
const BASE_BACKOFF: Duration = Duration::from_millis(250);

const MAX_BACKOFF: Duration = Duration::from_secs(1);

const TOKEN_HEADER: &str = "X-Aws-Parameters-Secrets-Token";

#[derive(Debug, Deserialize)]
struct SecretValueResponse {
    #[serde(rename = "SecretString")]
    secret_string: String,
}

#[derive(Debug, Deserialize)]
struct ParameterResponse {
    #[serde(rename = "Parameter")]
    parameter: ParameterValue,
}

#[derive(Debug, Deserialize)]
struct ParameterValue {
    #[serde(rename = "Value")]
    value: String,
}

/// Client for the local secrets extension
#[derive(Clone)]
pub struct SecretsClient {
    http: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
}

impl SecretsClient {
    /// Client for the extension on `localhost:{extension_port}`
    pub fn new(config: &SecretsConfig) -> Self {
        Self::with_base_url(
            format!("http://localhost:{}", config.extension_port),
            config.session_token.clone(),
        )
    }

    /// Client for an extension at an arbitrary base URL
    pub fn with_base_url(base_url: impl Into<String>, session_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            session_token,
        }
    }

    /// Secrets Manager `SecretString` for `secret_id`
    pub async fn get_secret(&self, secret_id: &str) -> Result<String> {
        let url = format!("{}/secretsmanager/get", self.base_url);
        let body = self.fetch(&url, &[("secretId", secret_id)], secret_id).await?;
        let response: SecretValueResponse = serde_json::from_str(&body)?;
        Ok(response.secret_string)
    }

    /// SSM parameter value for `name`
    pub async fn get_parameter(&self, name: &str, decrypt: bool) -> Result<String> {
        let url = format!("{}/systemsmanager/parameters/get", self.base_url);
        let mut query = vec![("name", name)];
        if decrypt {
            query.push(("withDecryption", "true"));
        }
        let body = self.fetch(&url, &query, name).await?;
        let response: ParameterResponse = serde_json::from_str(&body)?;
        Ok(response.parameter.value)
    }

    async fn fetch(&self, url: &str, query: &[(&str, &str)], name: &str) -> Result<String> {
        let token = self
            .session_token
            .as_deref()
            .ok_or_else(|| Error::Secrets("AWS_SESSION_TOKEN is not set".into()))?;

        let mut attempt = 0;
        loop {
            match self.fetch_once(url, query, name, token).await {
                Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = backoff(attempt);
                    attempt += 1;
                    tracing::info!(
                        "Retrying secret fetch from extension after HTTP 400 Bad Request error... Attempt {}",
                        attempt
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn fetch_once(&self, url: &str, query: &[(&str, &str)], name: &str, token: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .query(query)
            .header(TOKEN_HEADER, token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SecretsStatus {
                name: name.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}

/// Delay before retry number `attempt + 1`
fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

/// A value fetched at most once per process
#[derive(Default)]
pub struct CachedSecret {
    cell: OnceCell<String>,
}

impl CachedSecret {
    pub fn new() -> Self {
        Self::default()
    }

    /// Already resolved, without fetching
    pub fn preset(value: String) -> Self {
        Self { cell: OnceCell::new_with(Some(value)) }
    }

    /// Cached value, or the result of `fetch`; concurrent callers share one fetch
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<&str>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        self.cell.get_or_try_init(fetch).await.map(String::as_str)
    }

    pub fn is_cached(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::{HeaderMap, StatusCode}, routing::get, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serve a fake extension that fails the first `failures` calls with `status`
    async fn spawn_extension(failures: usize, status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));

        async fn secret(
            State((calls, failures, status)): State<(Arc<AtomicUsize>, usize, StatusCode)>,
            headers: HeaderMap,
        ) -> std::result::Result<Json<serde_json::Value>, StatusCode> {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if headers.get(TOKEN_HEADER).map(|v| v.as_bytes()) != Some(b"session".as_slice()) {
                return Err(StatusCode::FORBIDDEN);
            }
            if n < failures {
                return Err(status);
            }
            Ok(Json(serde_json::json!({ "SecretString": "sk-test", "Name": "openai" })))
        }

        async fn parameter() -> Json<serde_json::Value> {
            Json(serde_json::json!({ "Parameter": { "Name": "p", "Value": "param-value" } }))
        }

        let app = Router::new()
            .route("/secretsmanager/get", get(secret))
            .route("/systemsmanager/parameters/get", get(parameter))
            .with_state((Arc::clone(&calls), failures, status));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), calls)
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff(0), Duration::from_millis(250));
        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_secs(1));
        assert_eq!(backoff(10), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_secret_fetch() {
        let (url, calls) = spawn_extension(0, StatusCode::OK).await;
        let client = SecretsClient::with_base_url(url, Some("session".into()));
        assert_eq!(client.get_secret("openai").await.unwrap(), "sk-test");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_on_bad_request() {
        let (url, calls) = spawn_extension(2, StatusCode::BAD_REQUEST).await;
        let client = SecretsClient::with_base_url(url, Some("session".into()));
        assert_eq!(client.get_secret("openai").await.unwrap(), "sk-test");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_three_attempts() {
        let (url, calls) = spawn_extension(5, StatusCode::BAD_REQUEST).await;
        let client = SecretsClient::with_base_url(url, Some("session".into()));
        let err = client.get_secret("openai").await.unwrap_err();
        assert!(matches!(err, Error::SecretsStatus { status: 400, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_server_errors_not_retried() {
        let (url, calls) = spawn_extension(1, StatusCode::INTERNAL_SERVER_ERROR).await;
        let client = SecretsClient::with_base_url(url, Some("session".into()));
        assert!(client.get_secret("openai").await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parameter_fetch() {
        let (url, _) = spawn_extension(0, StatusCode::OK).await;
        let client = SecretsClient::with_base_url(url, Some("session".into()));
        assert_eq!(client.get_parameter("p", true).await.unwrap(), "param-value");
    }

    #[tokio::test]
    async fn test_missing_session_token() {
        let client = SecretsClient::with_base_url("http://127.0.0.1:1", None);
        assert!(matches!(client.get_secret("x").await, Err(Error::Secrets(_))));
    }

    #[tokio::test]
    async fn test_cached_secret_fetches_once() {
        let cache = Arc::new(CachedSecret::new());
        let fetches = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(|| async {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("value".to_string())
                    })
                    .await
                    .map(|v| v.to_string())
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "value");
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(cache.is_cached());
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let cache = CachedSecret::new();
        let err = cache.get_or_fetch(|| async { Err(Error::Secrets("down".into())) }).await;
        assert!(err.is_err());
        assert!(!cache.is_cached());

        let value = cache.get_or_fetch(|| async { Ok("later".to_string()) }).await.unwrap();
        assert_eq!(value, "later");
    }

    #[test]
    fn test_preset() {
        assert!(CachedSecret::preset("k".into()).is_cached());
    }
}
