//! Network collaborator contract and its HTTP implementation.

use std::{sync::Arc, time::Duration};

use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

use crate::{config::AppConfig, error::TransportError};

/// Re-exported so downstream crates can implement [`Transport`] without a direct dependency.
pub use async_trait::async_trait;

/// Performs the actual request/response cycle for cache operations.
///
/// Implementations own credentials, timeouts and any retry policy.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a collection or a single resource.
    async fn get(&self, url: &str) -> Result<Value, TransportError>;
    /// Create a resource.
    async fn post(&self, url: &str, body: Value) -> Result<Value, TransportError>;
    /// Replace a resource.
    async fn put(&self, url: &str, body: Value) -> Result<Value, TransportError>;
    /// Partially update a resource.
    async fn patch(&self, url: &str, body: Value) -> Result<Value, TransportError>;
    /// Remove a resource.
    async fn delete(&self, url: &str) -> Result<(), TransportError>;
}

/// Source of bearer tokens for [`HttpTransport`].
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Token to attach to the next request, if any.
    async fn token(&self) -> Option<String>;
    /// Obtain a fresh token after the server rejected the current one.
    async fn refresh(&self) -> Result<(), TransportError>;
}

/// Fixed token that cannot be refreshed.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wrap `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }

    async fn refresh(&self) -> Result<(), TransportError> {
        Err(TransportError::Auth(
            "static token was rejected and cannot be refreshed".to_string(),
        ))
    }
}

/// JSON-over-HTTP transport backed by `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl HttpTransport {
    /// Build a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            credentials: None,
        })
    }

    /// Build a transport from application configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, TransportError> {
        let transport = Self::new(Duration::from_millis(config.request_timeout_ms))?;
        Ok(match config.auth_token.as_deref() {
            Some(token) if !token.trim().is_empty() => {
                transport.with_credentials(Arc::new(StaticToken::new(token.trim())))
            }
            _ => transport,
        })
    }

    /// Attach a credential provider used for every request.
    pub fn with_credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, TransportError> {
        let response = self.execute(method.clone(), url, body).await?;
        let response = if response.status() == StatusCode::UNAUTHORIZED {
            match &self.credentials {
                Some(credentials) => {
                    info!(%method, url, "credentials rejected, refreshing");
                    credentials.refresh().await?;
                    self.execute(method.clone(), url, body).await?
                }
                None => response,
            }
        } else {
            response
        };
        read_response(response).await
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Response, TransportError> {
        debug!(%method, url, "sending request");
        let mut request = self.client.request(method, url);
        if let Some(credentials) = &self.credentials {
            if let Some(token) = credentials.token().await {
                request = request.bearer_auth(token);
            }
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Value, TransportError> {
        Ok(self.send(Method::GET, url, None).await?.unwrap_or(Value::Null))
    }

    async fn post(&self, url: &str, body: Value) -> Result<Value, TransportError> {
        Ok(self
            .send(Method::POST, url, Some(&body))
            .await?
            .unwrap_or(Value::Null))
    }

    async fn put(&self, url: &str, body: Value) -> Result<Value, TransportError> {
        Ok(self
            .send(Method::PUT, url, Some(&body))
            .await?
            .unwrap_or(Value::Null))
    }

    async fn patch(&self, url: &str, body: Value) -> Result<Value, TransportError> {
        Ok(self
            .send(Method::PATCH, url, Some(&body))
            .await?
            .unwrap_or(Value::Null))
    }

    async fn delete(&self, url: &str) -> Result<(), TransportError> {
        self.send(Method::DELETE, url, None).await.map(|_| ())
    }
}

async fn read_response(response: Response) -> Result<Option<Value>, TransportError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|err| TransportError::Network(format!("failed to read response body: {err}")))?;
    decode_body(status, &text)
}

fn decode_body(status: StatusCode, text: &str) -> Result<Option<Value>, TransportError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TransportError::Auth(error_message(status, text)));
    }
    if !status.is_success() {
        return Err(TransportError::Server {
            status: status.as_u16(),
            message: error_message(status, text),
        });
    }
    if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|err| TransportError::Network(format!("response is not valid JSON: {err}")))
}

fn error_message(status: StatusCode, text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    /// Local HTTP server answering one scripted response per connection.
    struct StubServer {
        url: String,
        authorization: Arc<Mutex<Vec<Option<String>>>>,
    }

    impl StubServer {
        async fn start(responses: Vec<(u16, &'static str)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}/cities/", listener.local_addr().unwrap());
            let authorization = Arc::new(Mutex::new(Vec::new()));
            let seen = authorization.clone();
            tokio::spawn(async move {
                for (status, body) in responses {
                    let (mut socket, _) = listener.accept().await.unwrap();
                    let head = read_head(&mut socket).await;
                    seen.lock().push(header(&head, "authorization"));
                    let response = format!(
                        "HTTP/1.1 {status} Scripted\r\ncontent-type: application/json\r\n\
                         content-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                    socket.shutdown().await.unwrap();
                }
            });
            Self { url, authorization }
        }

        fn authorization(&self) -> Vec<Option<String>> {
            self.authorization.lock().clone()
        }
    }

    /// Read the request head and drain any body, returning the head.
    async fn read_head(socket: &mut tokio::net::TcpStream) -> String {
        let mut request = Vec::new();
        let mut chunk = [0_u8; 1024];
        let head_end = loop {
            if let Some(pos) = request.windows(4).position(|window| window == b"\r\n\r\n") {
                break pos + 4;
            }
            let read = socket.read(&mut chunk).await.unwrap();
            if read == 0 {
                break request.len();
            }
            request.extend_from_slice(&chunk[..read]);
        };
        let head = String::from_utf8_lossy(&request[..head_end]).into_owned();
        let body_len: usize = header(&head, "content-length")
            .and_then(|len| len.parse().ok())
            .unwrap_or(0);
        while request.len() < head_end + body_len {
            let read = socket.read(&mut chunk).await.unwrap();
            if read == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..read]);
        }
        head
    }

    fn header(head: &str, name: &str) -> Option<String> {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }

    /// Token that becomes `fresh` after a successful refresh.
    struct RotatingToken {
        token: Mutex<String>,
        refreshes: AtomicUsize,
        refusable: bool,
    }

    impl RotatingToken {
        fn new(refusable: bool) -> Arc<Self> {
            Arc::new(Self {
                token: Mutex::new("stale".to_string()),
                refreshes: AtomicUsize::new(0),
                refusable,
            })
        }

        fn refreshes(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialProvider for RotatingToken {
        async fn token(&self) -> Option<String> {
            Some(self.token.lock().clone())
        }

        async fn refresh(&self) -> Result<(), TransportError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.refusable {
                return Err(TransportError::Auth("refresh refused".to_string()));
            }
            *self.token.lock() = "fresh".to_string();
            Ok(())
        }
    }

    fn transport_with(credentials: Option<Arc<RotatingToken>>) -> HttpTransport {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        match credentials {
            Some(credentials) => transport.with_credentials(credentials),
            None => transport,
        }
    }

    fn bearer(token: &str) -> Option<String> {
        Some(format!("Bearer {token}"))
    }

    #[tokio::test]
    async fn retries_once_with_refreshed_token_after_401() {
        let server = StubServer::start(vec![(401, ""), (200, r#"{"id": 1}"#)]).await;
        let credentials = RotatingToken::new(false);
        let transport = transport_with(Some(credentials.clone()));

        let value = transport.get(&server.url).await.unwrap();

        assert_eq!(value, json!({"id": 1}));
        assert_eq!(credentials.refreshes(), 1);
        assert_eq!(server.authorization(), vec![bearer("stale"), bearer("fresh")]);
    }

    #[tokio::test]
    async fn second_401_is_an_auth_error() {
        let server = StubServer::start(vec![(401, ""), (401, "token revoked")]).await;
        let credentials = RotatingToken::new(false);
        let transport = transport_with(Some(credentials.clone()));

        let result = transport.delete(&server.url).await;

        assert_eq!(result, Err(TransportError::Auth("token revoked".to_string())));
        assert_eq!(credentials.refreshes(), 1);
        assert_eq!(server.authorization().len(), 2);
    }

    #[tokio::test]
    async fn unauthorized_without_credentials_is_not_retried() {
        let server = StubServer::start(vec![(401, "")]).await;
        let transport = transport_with(None);

        let result = transport.post(&server.url, json!({"name": "Visby"})).await;

        assert_eq!(result, Err(TransportError::Auth("Unauthorized".to_string())));
        assert_eq!(server.authorization(), vec![None]);
    }

    #[tokio::test]
    async fn failed_refresh_is_an_auth_error_without_retry() {
        let server = StubServer::start(vec![(401, "")]).await;
        let credentials = RotatingToken::new(true);
        let transport = transport_with(Some(credentials.clone()));

        let result = transport.get(&server.url).await;

        assert_eq!(result, Err(TransportError::Auth("refresh refused".to_string())));
        assert_eq!(credentials.refreshes(), 1);
        assert_eq!(server.authorization(), vec![bearer("stale")]);
    }

    #[test]
    fn success_bodies_decode_to_json() {
        let value = decode_body(StatusCode::OK, r#"{"id": 3}"#).unwrap();
        assert_eq!(value, Some(json!({"id": 3})));
        assert_eq!(decode_body(StatusCode::NO_CONTENT, "").unwrap(), None);
        assert_eq!(decode_body(StatusCode::OK, "  ").unwrap(), None);
    }

    #[test]
    fn failures_are_categorized() {
        assert_eq!(
            decode_body(StatusCode::UNAUTHORIZED, ""),
            Err(TransportError::Auth("Unauthorized".to_string()))
        );
        assert_eq!(
            decode_body(StatusCode::NOT_FOUND, "no such city\n"),
            Err(TransportError::Server {
                status: 404,
                message: "no such city".to_string()
            })
        );
        assert!(matches!(
            decode_body(StatusCode::OK, "<html>"),
            Err(TransportError::Network(_))
        ));
    }

    #[tokio::test]
    async fn static_token_cannot_refresh() {
        let token = StaticToken::new("abc");
        assert_eq!(token.token().await.as_deref(), Some("abc"));
        assert!(matches!(token.refresh().await, Err(TransportError::Auth(_))));
    }

    #[test]
    fn builds_from_config() {
        let config = AppConfig {
            auth_token: Some("secret".to_string()),
            ..AppConfig::default()
        };
        let transport = HttpTransport::from_config(&config).unwrap();
        assert!(transport.credentials.is_some());
        let transport = HttpTransport::from_config(&AppConfig::default()).unwrap();
        assert!(transport.credentials.is_none());
    }
}
