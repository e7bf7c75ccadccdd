//! # snapcrawl
//!
//! One-shot headless-Chrome crawl against a fingerprinting test site.
//! Visits the target page, captures the two JSON payloads the site POSTs to
//! its backend, and writes them together with a full-page screenshot, an A4
//! PDF and the serialized DOM into a timestamped snapshot folder.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapcrawl::{CrawlConfig, Crawler};
//!
//! # #[tokio::main]
//! # async fn main() -> snapcrawl::Result<()> {
//! let config = CrawlConfig::default();
//! let crawler = Crawler::new(config).await?;
//! let report = crawler.run().await;
//! println!("Success: {}", report.success);
//! # Ok(())
//! # }
//! ```

mod config;
mod crawl;
mod observer;
mod page;
mod prep;
mod session;

pub use config::CrawlConfig;
pub use crawl::{make_crawl_id, make_snapshot_folder, CrawlReport, Crawler};
pub use observer::{CaptureStats, CaptureTarget, ResponseObserver};
pub use page::{
    capture_inner_html, click_link_element, click_link_element_new_tab, current_url,
    navigate_to_url, page_wait, random_page_wait, random_range, scroll_to_element, WaitUntil,
};
pub use prep::{default_prep_steps, PrepStep};
pub use session::{
    build_chrome_args, build_launch_spec, LaunchSpec, Session, SessionOptions,
    DEFAULT_NAV_TIMEOUT_MS, DEFAULT_VIEWPORT_HEIGHT, DEFAULT_VIEWPORT_WIDTH,
};

/// Result type for snapcrawl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or driving a crawl.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller-supplied value was rejected up front (zero timeout,
    /// inverted wait bounds).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required handle was absent (no page, no browser).
    #[error("missing resource: {0}")]
    MissingResource(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("browser error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error("launch error: {0}")]
    Launch(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("capture error: {0}")]
    Capture(String),
}
