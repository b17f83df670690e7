//! HTTP transport backed by `reqwest`.

use bytes::BytesMut;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::TransportError;
use crate::operation::Method;
use crate::transport::{Progress, TransferFuture, Transport, TransportRequest, TransportResponse};

/// Sends dispatched requests over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with the given settings.
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::Request {
                    url: String::new(),
                    reason: format!("invalid default header name {}: {}", name, e),
                }
            })?;
            let value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                TransportError::Request {
                    url: String::new(),
                    reason: format!("invalid default header value: {}", e),
                }
            })?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
    }
}

fn classify(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::TimedOut {
            url: url.to_string(),
        }
    } else if e.is_connect() {
        TransportError::Connection {
            url: url.to_string(),
            reason: e.to_string(),
        }
    } else {
        TransportError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

impl Transport for HttpTransport {
    fn start(&self, request: TransportRequest, progress: Progress) -> TransferFuture {
        let mut builder = self
            .client
            .request(method(request.method), &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let url = request.url;

        Box::pin(async move {
            let started = Instant::now();
            let mut response = builder.send().await.map_err(|e| classify(&url, e))?;
            let latency = started.elapsed();
            let status = response.status().as_u16();

            let total = response.content_length();
            let mut body = BytesMut::with_capacity(total.unwrap_or(0).min(1 << 20) as usize);
            while let Some(chunk) = response.chunk().await.map_err(|e| TransportError::Body {
                url: url.clone(),
                reason: e.to_string(),
            })? {
                body.extend_from_slice(&chunk);
                progress.report(body.len() as u64, total);
            }
            let body = body.freeze();
            let elapsed = started.elapsed();
            debug!(%url, status, bytes = body.len(), ?latency, ?elapsed, "Transfer finished");
            Ok(TransportResponse {
                status,
                body,
                latency,
                elapsed,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        serve_parts(vec![response]).await
    }

    /// Answers one connection, writing `parts` as separate writes.
    async fn serve_parts(parts: Vec<&'static str>) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            for part in parts {
                stream.write_all(part.as_bytes()).await.unwrap();
                stream.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{}/items", addr), handle)
    }

    fn detached() -> Progress {
        Progress::channel().0
    }

    fn get(url: String, query: Vec<(String, String)>) -> TransportRequest {
        TransportRequest {
            identity: "Items".to_string(),
            method: Method::Get,
            url,
            headers: vec![("x-request".to_string(), "1".to_string())],
            query,
            body: None,
            accepted_status: vec![200..=299],
        }
    }

    #[test]
    fn test_rejects_invalid_default_header() {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("bad header".to_string(), "x".to_string());
        let config = HttpConfig {
            default_headers,
            ..HttpConfig::default()
        };
        assert!(HttpTransport::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_get_with_query_and_headers() {
        let (url, server) =
            serve_once("HTTP/1.1 200 OK\r\ncontent-length: 5\r\nconnection: close\r\n\r\nhello").await;
        let mut default_headers = BTreeMap::new();
        default_headers.insert("x-client".to_string(), "netsched".to_string());
        let transport = HttpTransport::new(&HttpConfig {
            default_headers,
            ..HttpConfig::default()
        })
        .unwrap();

        let response = transport
            .start(get(url, vec![("page".to_string(), "2".to_string())]), detached())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from_static(b"hello"));
        assert!(response.elapsed >= response.latency);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("GET /items?page=2 "));
        assert!(raw.to_lowercase().contains("x-request: 1"));
        assert!(raw.to_lowercase().contains("x-client: netsched"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_returned() {
        let (url, server) =
            serve_once("HTTP/1.1 404 Not Found\r\ncontent-length: 4\r\nconnection: close\r\n\r\nnope").await;
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();

        let response = transport.start(get(url, Vec::new()), detached()).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(&response.body[..], b"nope");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let result = transport
            .start(get(format!("http://{}/items", addr), Vec::new()), detached())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reports_download_progress() {
        let (url, server) = serve_parts(vec![
            "HTTP/1.1 200 OK\r\ncontent-length: 10\r\nconnection: close\r\n\r\n",
            "abcd",
            "efghij",
        ])
        .await;
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let (progress, mut rx) = Progress::channel();

        let transfer = tokio::spawn(transport.start(get(url, Vec::new()), progress));
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let fraction = *rx.borrow_and_update();
            seen.push(fraction);
            if fraction >= 1.0 {
                break;
            }
        }
        let response = transfer.await.unwrap().unwrap();

        assert_eq!(&response.body[..], b"abcdefghij");
        assert_eq!(seen.last().copied(), Some(1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().any(|f| *f > 0.0 && *f < 1.0));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_length_reports_no_progress() {
        let (url, server) =
            serve_once("HTTP/1.1 200 OK\r\nconnection: close\r\n\r\nstreamed body").await;
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let (progress, rx) = Progress::channel();

        let response = transport.start(get(url, Vec::new()), progress).await.unwrap();
        assert_eq!(&response.body[..], b"streamed body");
        assert_eq!(*rx.borrow(), 0.0);
        server.await.unwrap();
    }
}
