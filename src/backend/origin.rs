use async_trait::async_trait;
use bytes::Bytes;

use crate::core::{RouterError, RouterResult};

use super::{Endpoint, Scheme};

/// Outbound HTTP calls to a backing origin.
#[async_trait]
pub trait OriginClient: Send + Sync {
    /// GETs `/` on the endpoint and returns the whole body.
    ///
    /// `origin` names the upstream in failures; any non-2xx status is a failure.
    async fn fetch(&self, origin: &str, scheme: Scheme, endpoint: &Endpoint) -> RouterResult<Bytes>;
}

/// [`OriginClient`] backed by a shared `reqwest` connection pool.
pub struct HttpOriginClient {
    client: reqwest::Client,
}

impl HttpOriginClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OriginClient for HttpOriginClient {
    async fn fetch(
        &self,
        origin: &str,
        scheme: Scheme,
        endpoint: &Endpoint,
    ) -> RouterResult<Bytes> {
        let url = scheme.url(endpoint, "/");
        log::debug!("Fetching origin '{origin}' at {url}");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RouterError::upstream(origin, e).at(endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RouterError::UpstreamUnavailable {
                upstream: origin.to_string(),
                endpoint: Some(endpoint.clone()),
                status: Some(status.as_u16()),
                detail: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        resp.bytes()
            .await
            .map_err(|e| RouterError::upstream(origin, e).at(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    async fn serve_once(response: &'static str) -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        Endpoint::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_fetch_body() {
        let endpoint = serve_once(concat!(
            "HTTP/1.1 200 OK\r\ncontent-length: 21\r\nconnection: close\r\n\r\n",
            "<h1>hello nginx</h1>\n",
        ))
        .await;

        let client = HttpOriginClient::new(reqwest::Client::new());
        let body = client.fetch("nginx", Scheme::HTTP, &endpoint).await.unwrap();
        assert_eq!(&body[..], b"<h1>hello nginx</h1>\n");
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let endpoint = serve_once(
            "HTTP/1.1 502 Bad Gateway\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;

        let client = HttpOriginClient::new(reqwest::Client::new());
        let err = client.fetch("nginx", Scheme::HTTP, &endpoint).await.unwrap_err();
        match err {
            RouterError::UpstreamUnavailable {
                upstream, status, ..
            } => {
                assert_eq!(upstream, "nginx");
                assert_eq!(status, Some(502));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_origin() {
        // Bind then drop so the port is closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = HttpOriginClient::new(reqwest::Client::new());
        let err = client
            .fetch("custom", Scheme::HTTP, &Endpoint::new("127.0.0.1", port))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "UpstreamUnavailable");
        assert_eq!(err.to_fields()["port"], port);
    }
}
