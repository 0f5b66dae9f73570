//! Error types for page fetching and extraction

use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum Error {
    /// Transport-level failure (DNS, connect, TLS, body read)
    Http(reqwest::Error),
    /// Terminal non-2xx response
    Status { status: u16, url: String },
    /// Response body exceeded the configured limit
    BodyTooLarge { limit: usize, url: String },
    /// Headless browser failure (launch, CDP, navigation)
    Browser(String),
    /// URL could not be parsed or has no usable host
    InvalidUrl(String),
    /// Selector could not be parsed
    InvalidSelector(String),
    /// Selector matched nothing (or only empty text)
    SelectorNotFound(String),
    /// Render + extract exceeded the allotted time
    Timeout(Duration),
    /// The session pool was shut down
    PoolClosed,
}

impl Error {
    /// True for every failure that happened while loading the page,
    /// as opposed to evaluating the selector against it.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Status { .. }
                | Error::BodyTooLarge { .. }
                | Error::Browser(_)
                | Error::InvalidUrl(_)
                | Error::Timeout(_)
                | Error::PoolClosed
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::Status { status, url } => write!(f, "HTTP status {} from {}", status, url),
            Error::BodyTooLarge { limit, url } => {
                write!(f, "Response from {} exceeds {} bytes", url, limit)
            }
            Error::Browser(msg) => write!(f, "Browser error: {}", msg),
            Error::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            Error::InvalidSelector(msg) => write!(f, "Invalid selector: {}", msg),
            Error::SelectorNotFound(selector) => {
                write!(f, "Selector matched no content: {}", selector)
            }
            Error::Timeout(d) => write!(f, "Timed out after {}s", d.as_secs()),
            Error::PoolClosed => write!(f, "Render session pool is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err)
    }
}

impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Browser(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
