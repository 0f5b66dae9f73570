//! Headless Chrome renderer
//!
//! Pages are loaded in a shared browser process over the DevTools protocol
//! and read back once their DOM stops changing, so content produced by
//! scripts is visible to the locator.

use crate::error::{Error, Result};
use crate::renderer::{RenderedPage, Renderer, DEFAULT_USER_AGENT};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, ResourceType};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct BrowserRendererConfig {
    /// Chrome binary; auto-detected when unset
    pub chrome_executable: Option<PathBuf>,
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Delay between two DOM snapshots while waiting for the page to settle
    pub settle_interval: Duration,
    /// Upper bound on settling; the last snapshot is used once reached
    pub max_settle: Duration,
    pub no_sandbox: bool,
}

impl Default for BrowserRendererConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            settle_interval: Duration::from_millis(250),
            max_settle: Duration::from_secs(5),
            no_sandbox: true,
        }
    }
}

pub struct BrowserRenderer {
    browser: Browser,
    handler: JoinHandle<()>,
    settle_interval: Duration,
    max_settle: Duration,
}

impl BrowserRenderer {
    /// Start a headless browser and drive its event loop on the current runtime
    pub async fn launch(config: BrowserRendererConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(config.request_timeout)
            .args([
                "--disable-gpu".to_string(),
                "--disable-dev-shm-usage".to_string(),
                format!("--user-agent={}", config.user_agent),
            ]);
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(Error::Browser)?;

        let (browser, mut handler) = Browser::launch(browser_config).await?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
            debug!("Browser handler stopped");
        });
        info!("Headless browser launched");

        Ok(Self {
            browser,
            handler,
            settle_interval: config.settle_interval,
            max_settle: config.max_settle,
        })
    }
}

impl Drop for BrowserRenderer {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Closes the tab when a render finishes, fails or is cancelled by a timeout
struct PageGuard {
    page: Page,
    url: String,
    handle: tokio::runtime::Handle,
}

impl PageGuard {
    fn new(page: Page, url: &Url) -> Self {
        Self {
            page,
            url: url.to_string(),
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let page = self.page.clone();
        let url = std::mem::take(&mut self.url);
        self.handle.spawn(async move {
            match page.close().await {
                Ok(()) => trace!("Closed page for {}", url),
                Err(e) => warn!("Failed to close page for {}: {}", url, e),
            }
        });
    }
}

#[async_trait]
impl Renderer for BrowserRenderer {
    async fn render(&self, url: &Url) -> Result<RenderedPage> {
        let guard = PageGuard::new(self.browser.new_page("about:blank").await?, url);
        let page = &guard.page;

        let mut responses = page.event_listener::<EventResponseReceived>().await?;
        page.goto(url.as_str()).await?;

        let status = tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(event) = responses.next().await {
                if event.r#type == ResourceType::Document {
                    return Some(event.response.status);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(200);

        let final_url = page
            .url()
            .await?
            .and_then(|u| Url::parse(&u).ok())
            .unwrap_or_else(|| url.clone());

        if !(200..300).contains(&status) {
            return Err(Error::Status {
                status,
                url: final_url.to_string(),
            });
        }

        let html = wait_until_stable(|| page.content(), self.settle_interval, self.max_settle).await?;
        debug!("Rendered {} in browser ({} bytes)", final_url, html.len());

        Ok(RenderedPage {
            final_url,
            status,
            html,
        })
    }
}

/// Read the document repeatedly until two consecutive snapshots match or
/// `max_settle` has elapsed.
async fn wait_until_stable<F, Fut, E>(
    mut read: F,
    interval: Duration,
    max_settle: Duration,
) -> std::result::Result<String, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<String, E>>,
{
    let deadline = tokio::time::Instant::now() + max_settle;
    let mut previous = read().await?;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Ok(previous);
        }
        tokio::time::sleep(interval).await;
        let current = read().await?;
        if current == previous {
            return Ok(current);
        }
        previous = current;
    }
}
