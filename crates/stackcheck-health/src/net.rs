//! Network collaborator: HTTP GET and TCP connect with explicit timeouts.
//!
//! Probes depend on the [`Network`] trait so tests can script responses.
//! [`HyperNetwork`] is the real implementation: a plain HTTP/1.1 client
//! built on a `tokio` TCP stream and a `hyper` connection handshake.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

/// Bodies larger than this are truncated.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Transient network failures. Absorbed by probe retry logic.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request timed out")]
    Timeout,

    #[error("http error: {0}")]
    Http(String),
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Boxed future alias for network calls.
pub type NetworkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, NetworkError>> + Send + 'a>>;

/// Network access used by probes.
pub trait Network: Send + Sync {
    /// GET `url`. `connect_timeout` bounds the TCP connect, `total_timeout`
    /// bounds the whole exchange.
    fn http_get<'a>(
        &'a self,
        url: &'a str,
        connect_timeout: Duration,
        total_timeout: Duration,
    ) -> NetworkFuture<'a, HttpResponse>;

    /// Open (and immediately drop) a TCP connection.
    fn tcp_connect<'a>(&'a self, host: &'a str, port: u16, timeout: Duration) -> NetworkFuture<'a, ()>;
}

/// Plain HTTP/1.1 + TCP client on tokio and hyper.
#[derive(Debug, Clone)]
pub struct HyperNetwork {
    max_body_bytes: usize,
}

impl Default for HyperNetwork {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl HyperNetwork {
    pub fn with_max_body_bytes(max_body_bytes: usize) -> Self {
        Self { max_body_bytes }
    }
}

impl Network for HyperNetwork {
    fn http_get<'a>(
        &'a self,
        url: &'a str,
        connect_timeout: Duration,
        total_timeout: Duration,
    ) -> NetworkFuture<'a, HttpResponse> {
        Box::pin(async move {
            let result = tokio::time::timeout(
                total_timeout,
                fetch(url, connect_timeout, self.max_body_bytes),
            )
            .await;
            match result {
                Ok(response) => response,
                Err(_) => {
                    debug!(%url, "http request timed out");
                    Err(NetworkError::Timeout)
                }
            }
        })
    }

    fn tcp_connect<'a>(&'a self, host: &'a str, port: u16, timeout: Duration) -> NetworkFuture<'a, ()> {
        Box::pin(async move {
            connect(host, port, timeout).await?;
            Ok(())
        })
    }
}

async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, NetworkError> {
    let addr = format!("{host}:{port}");
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => {
            debug!(%addr, error = %source, "tcp connect failed");
            Err(NetworkError::Connect { addr, source })
        }
        Err(_) => {
            debug!(%addr, "tcp connect timed out");
            Err(NetworkError::ConnectTimeout { addr })
        }
    }
}

async fn fetch(url: &str, connect_timeout: Duration, max_body_bytes: usize) -> Result<HttpResponse, NetworkError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|_| NetworkError::InvalidUrl(url.to_string()))?;
    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => return Err(NetworkError::UnsupportedScheme(other.to_string())),
        None => return Err(NetworkError::InvalidUrl(url.to_string())),
    }
    let authority = uri
        .authority()
        .ok_or_else(|| NetworkError::InvalidUrl(url.to_string()))?
        .clone();
    let host = authority.host().trim_start_matches('[').trim_end_matches(']');
    let port = authority.port_u16().unwrap_or(80);
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    let stream = connect(host, port, connect_timeout).await?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| NetworkError::Http(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", authority.as_str())
        .header("user-agent", concat!("stackcheck/", env!("CARGO_PKG_VERSION")))
        .body(Empty::<Bytes>::new())
        .map_err(|e| NetworkError::Http(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| NetworkError::Http(e.to_string()))?;
    let status = resp.status().as_u16();

    let mut body = resp.into_body();
    let mut buf: Vec<u8> = Vec::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| NetworkError::Http(e.to_string()))?;
        if let Ok(data) = frame.into_data() {
            let room = max_body_bytes.saturating_sub(buf.len());
            buf.extend_from_slice(&data[..data.len().min(room)]);
            if buf.len() >= max_body_bytes {
                break;
            }
        }
    }

    debug!(%url, status, bytes = buf.len(), "http response received");
    Ok(HttpResponse {
        status,
        body: String::from_utf8_lossy(&buf).into_owned(),
    })
}
