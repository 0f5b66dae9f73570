//! Page renderers
//!
//! A renderer turns a URL into a settled HTML document.
//! [`BrowserRenderer`](crate::browser::BrowserRenderer) runs the page in
//! headless Chrome; [`HttpRenderer`] fetches the server response as-is and
//! serves as the fallback when no browser is available.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Largest response body the HTTP renderer will buffer
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// A loaded document ready for selector evaluation
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// URL after redirects
    pub final_url: Url,
    pub status: u16,
    pub html: String,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Load `url` and return the document once it has settled.
    ///
    /// Implementations must not keep per-call state across invocations;
    /// concurrency is bounded by the caller's session pool.
    async fn render(&self, url: &Url) -> Result<RenderedPage>;
}

#[derive(Debug, Clone)]
pub struct HttpRendererConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub max_redirects: usize,
    pub max_body_bytes: usize,
}

impl Default for HttpRendererConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Plain HTTP renderer backed by reqwest
pub struct HttpRenderer {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpRenderer {
    pub fn new(config: HttpRendererConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, url: &Url) -> Result<RenderedPage> {
        let response = self.client.get(url.as_str()).send().await?;

        let status = response.status();
        let final_url = response.url().clone();

        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                url: final_url.to_string(),
            });
        }

        let too_large = || Error::BodyTooLarge {
            limit: self.max_body_bytes,
            url: final_url.to_string(),
        };
        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(too_large());
        }

        let mut response = response;
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        let html = String::from_utf8_lossy(&body).into_owned();
        tracing::debug!("Rendered {} ({} bytes)", final_url, html.len());

        Ok(RenderedPage {
            final_url,
            status: status.as_u16(),
            html,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP response per connection with a body of `body_len` bytes
    async fn serve(body_len: usize, with_length: bool) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let header = if with_length {
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body_len
                    )
                } else {
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n"
                        .to_string()
                };
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&vec![b'a'; body_len]).await;
                let _ = socket.shutdown().await;
            }
        });
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    fn renderer(max_body_bytes: usize) -> HttpRenderer {
        HttpRenderer::new(HttpRendererConfig {
            max_body_bytes,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_body_within_limit() {
        let url = serve(100, true).await;
        let page = renderer(1024).render(&url).await.unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(page.html.len(), 100);
    }

    #[tokio::test]
    async fn test_declared_length_over_limit() {
        let url = serve(4096, true).await;
        let err = renderer(1024).render(&url).await.unwrap_err();
        assert!(matches!(err, Error::BodyTooLarge { limit: 1024, .. }));
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit() {
        let url = serve(4096, false).await;
        let err = renderer(1024).render(&url).await.unwrap_err();
        assert!(matches!(err, Error::BodyTooLarge { .. }));
        assert!(err.is_fetch_failure());
    }
}
