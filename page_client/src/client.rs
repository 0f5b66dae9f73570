//! Fetch + extract client

use crate::error::{Error, Result};
use crate::extract::extract;
use crate::locator::Locator;
use crate::pool::SessionPool;
use crate::renderer::Renderer;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Content extracted from a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub content: String,
    pub title: Option<String>,
    pub final_url: String,
}

#[derive(Clone)]
pub struct PageClient {
    pool: SessionPool,
    default_timeout: Duration,
}

impl PageClient {
    pub fn new(renderer: Arc<dyn Renderer>, max_sessions: usize, default_timeout: Duration) -> Self {
        Self {
            pool: SessionPool::new(renderer, max_sessions),
            default_timeout,
        }
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Check that `url` is an http(s) URL with a host.
    pub fn parse_url(url: &str) -> Result<Url> {
        let parsed = Url::parse(url.trim())?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(Error::InvalidUrl(format!("unsupported scheme '{}'", other))),
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(Error::InvalidUrl(format!("no host in '{}'", url)));
        }
        Ok(parsed)
    }

    /// Load `url`, evaluate `selector` and return the normalized text.
    ///
    /// The whole operation, including waiting for a free session, is bounded
    /// by `timeout` (or the client default).
    pub async fn fetch(
        &self,
        url: &str,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<PageContent> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let url = Self::parse_url(url)?;
        let locator = Locator::parse(selector)?;

        match tokio::time::timeout(timeout, self.fetch_inner(&url, &locator, selector)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Fetch of {} timed out after {:?}", url, timeout);
                Err(Error::Timeout(timeout))
            }
        }
    }

    async fn fetch_inner(&self, url: &Url, locator: &Locator, selector: &str) -> Result<PageContent> {
        let session = self.pool.checkout().await?;
        let page = session.render(url).await?;
        drop(session);

        let extraction = extract(&page.html, locator, selector)?;
        tracing::debug!(
            "Extracted {} node(s) from {} with '{}'",
            extraction.matched,
            page.final_url,
            selector
        );

        Ok(PageContent {
            content: extraction.content,
            title: extraction.title,
            final_url: page.final_url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::RenderedPage;
    use async_trait::async_trait;

    struct FixedRenderer {
        html: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl Renderer for FixedRenderer {
        async fn render(&self, url: &Url) -> Result<RenderedPage> {
            tokio::time::sleep(self.delay).await;
            Ok(RenderedPage {
                final_url: url.clone(),
                status: 200,
                html: self.html.to_string(),
            })
        }
    }

    struct FailingRenderer;

    #[async_trait]
    impl Renderer for FailingRenderer {
        async fn render(&self, url: &Url) -> Result<RenderedPage> {
            Err(Error::Status {
                status: 503,
                url: url.to_string(),
            })
        }
    }

    fn client(renderer: impl Renderer + 'static) -> PageClient {
        PageClient::new(Arc::new(renderer), 2, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_fetch_extracts_content() {
        let client = client(FixedRenderer {
            html: "<html><head><title>T</title></head><body><h1> Hello </h1></body></html>",
            delay: Duration::ZERO,
        });

        let page = client
            .fetch("https://example.com/", "//h1", None)
            .await
            .unwrap();
        assert_eq!(page.content, "Hello");
        assert_eq!(page.title.as_deref(), Some("T"));
        assert_eq!(client.pool().available(), 2);
    }

    #[tokio::test]
    async fn test_fetch_timeout_releases_session() {
        let client = client(FixedRenderer {
            html: "<p>x</p>",
            delay: Duration::from_secs(10),
        });

        let err = client
            .fetch("https://example.com/", "//p", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_fetch_failure());
        assert_eq!(client.pool().available(), 2);
    }

    #[tokio::test]
    async fn test_fetch_status_error_is_fetch_failure() {
        let client = client(FailingRenderer);
        let err = client
            .fetch("https://example.com/", "//p", None)
            .await
            .unwrap_err();
        assert!(err.is_fetch_failure());
        assert_eq!(client.pool().available(), 2);
    }

    #[tokio::test]
    async fn test_selector_not_found_is_not_fetch_failure() {
        let client = client(FixedRenderer {
            html: "<p>x</p>",
            delay: Duration::ZERO,
        });
        let err = client
            .fetch("https://example.com/", "//table", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SelectorNotFound(_)));
        assert!(!err.is_fetch_failure());
    }

    #[test]
    fn test_parse_url() {
        assert!(PageClient::parse_url("https://example.com/a?b=1").is_ok());
        assert!(PageClient::parse_url("ftp://example.com").is_err());
        assert!(PageClient::parse_url("not a url").is_err());
        assert!(PageClient::parse_url("http://").is_err());
    }
}
