//! HTTP transport seam
//!
//! The engine only sees [`Transport`]; production runs use
//! [`ReqwestTransport`], tests plug in scripted fakes.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;

use specprobe_core::{ConfigError, ExecutionPlan, ResponseData, TransportError, TransportErrorKind};

/// Sends one plan and hands back whatever the server said.
///
/// Any HTTP status is a successful send; only failures to obtain a response
/// are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, plan: &ExecutionPlan) -> Result<ResponseData, TransportError>;
}

/// [`Transport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the client cannot be built (TLS
    /// backend initialization)
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, plan: &ExecutionPlan) -> Result<ResponseData, TransportError> {
        let method = reqwest::Method::from_bytes(plan.method.as_bytes()).map_err(|_| {
            TransportError::new(
                TransportErrorKind::Request,
                format!("invalid HTTP method '{}'", plan.method),
            )
        })?;

        let mut req = self.client.request(method, &plan.url);
        for (k, v) in &plan.headers {
            // Values that are not valid HTTP (e.g. \0, \r\n) never reach the
            // server
            if reqwest::header::HeaderValue::from_str(v).is_ok() {
                req = req.header(k, v);
            } else {
                tracing::debug!(index = plan.index, header = %k, "dropping header with invalid value");
            }
        }
        if let Some(body) = &plan.body {
            req = req.body(body.clone());
        }

        let resp = req.send().await.map_err(classify)?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = resp.text().await.map_err(classify)?;

        Ok(ResponseData {
            status,
            headers,
            body,
        })
    }
}

/// Map a reqwest failure onto a retry-relevant kind.
fn classify(err: reqwest::Error) -> TransportError {
    let message = error_chain(&err);
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        connect_kind(&err, &message)
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else if err.is_builder() || err.is_redirect() || (err.is_request() && io_kind(&err).is_none()) {
        TransportErrorKind::Request
    } else {
        io_kind(&err).map_or(TransportErrorKind::ConnectionReset, kind_from_io)
    };
    TransportError::new(kind, message)
}

fn connect_kind(err: &reqwest::Error, message: &str) -> TransportErrorKind {
    match io_kind(err) {
        Some(io::ErrorKind::ConnectionRefused) => TransportErrorKind::ConnectionRefused,
        Some(io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted) => {
            TransportErrorKind::ConnectionReset
        }
        Some(io::ErrorKind::NetworkUnreachable | io::ErrorKind::HostUnreachable) => {
            TransportErrorKind::NetworkUnreachable
        }
        Some(io::ErrorKind::TimedOut) => TransportErrorKind::Timeout,
        _ if message.to_ascii_lowercase().contains("dns error") => TransportErrorKind::Dns,
        _ => TransportErrorKind::Connect,
    }
}

fn kind_from_io(kind: io::ErrorKind) -> TransportErrorKind {
    match kind {
        io::ErrorKind::ConnectionRefused => TransportErrorKind::ConnectionRefused,
        io::ErrorKind::NetworkUnreachable | io::ErrorKind::HostUnreachable => {
            TransportErrorKind::NetworkUnreachable
        }
        io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
        io::ErrorKind::UnexpectedEof => TransportErrorKind::Body,
        _ => TransportErrorKind::ConnectionReset,
    }
}

/// First `io::Error` in the source chain.
fn io_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = cause.source();
    }
    None
}

/// `"outer: inner: root"`; reqwest's own Display omits the causes.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn plan(url: &str) -> ExecutionPlan {
        ExecutionPlan {
            index: 0,
            method: "GET".into(),
            endpoint: "/".into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn refused_connection_is_retryable() {
        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let err = transport.send(&plan("http://127.0.0.1:1/")).await.unwrap_err();
        assert!(
            matches!(
                err.kind,
                TransportErrorKind::ConnectionRefused | TransportErrorKind::Connect
            ),
            "{err}"
        );
        assert!(err.kind.is_retryable());
    }

    #[tokio::test]
    async fn invalid_method_is_a_request_error() {
        let transport = ReqwestTransport::new(Duration::from_secs(1)).unwrap();
        let mut bad = plan("http://127.0.0.1:1/");
        bad.method = "NOT A METHOD".into();
        let err = transport.send(&bad).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Request);
        assert!(!err.kind.is_retryable());
    }

    /// Answers every request with its own request head as the body.
    async fn spawn_echo_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let head = String::from_utf8_lossy(&buf).to_ascii_lowercase();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{head}",
                    head.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn invalid_header_values_are_dropped() {
        let url = spawn_echo_server().await;
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let transport = ReqwestTransport::from_client(client);

        let mut request = plan(&url);
        request.headers.insert("X-Good".into(), "yes".into());
        request.headers.insert("X-Bad".into(), "line\r\nbreak".into());
        let response = transport.send(&request).await.unwrap();

        assert_eq!(response.status, 200);
        assert!(response.body.contains("x-good: yes"), "{}", response.body);
        assert!(!response.body.contains("x-bad"), "{}", response.body);
    }

    #[test]
    fn io_kinds_map_to_transport_kinds() {
        assert_eq!(
            kind_from_io(io::ErrorKind::ConnectionRefused),
            TransportErrorKind::ConnectionRefused
        );
        assert_eq!(kind_from_io(io::ErrorKind::TimedOut), TransportErrorKind::Timeout);
        assert_eq!(
            kind_from_io(io::ErrorKind::BrokenPipe),
            TransportErrorKind::ConnectionReset
        );
    }

    #[derive(Debug)]
    struct ConnectFailed(io::Error);

    impl std::fmt::Display for ConnectFailed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("connect failed")
        }
    }

    impl StdError for ConnectFailed {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn error_chain_includes_causes() {
        let err = ConnectFailed(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(error_chain(&err), "connect failed: refused");
        assert_eq!(io_kind(&err), Some(io::ErrorKind::ConnectionRefused));
    }
}
