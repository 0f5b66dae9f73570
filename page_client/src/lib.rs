//! Page fetching and content extraction
//!
//! Loads a page through a pluggable [`Renderer`], bounded by a
//! [`SessionPool`], and extracts the text selected by an XPath-like
//! [`Locator`].

pub mod browser;
pub mod client;
pub mod error;
pub mod extract;
pub mod locator;
pub mod pool;
pub mod renderer;

pub use browser::{BrowserRenderer, BrowserRendererConfig};
pub use client::{PageClient, PageContent};
pub use error::{Error, Result};
pub use extract::normalize_whitespace;
pub use locator::Locator;
pub use pool::{Session, SessionPool};
pub use renderer::{
    HttpRenderer, HttpRendererConfig, DEFAULT_MAX_BODY_BYTES, RenderedPage, Renderer,
    DEFAULT_USER_AGENT,
};
