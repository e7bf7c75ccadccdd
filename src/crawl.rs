//! Crawl driver.
//!
//! One end-to-end capture run: open a session, create the snapshot folder,
//! observe the two capture endpoints, navigate, let the target's own
//! fingerprinting finish, then write the screenshot, the PDF printout and the
//! DOM snapshot. The session is torn down on every exit path; a failure
//! anywhere in the sequence is logged once here and surfaced through the
//! report instead of propagating.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::page::ScreenshotParams;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::config::CrawlConfig;
use crate::observer::{CaptureStats, CaptureTarget, ResponseObserver};
use crate::page::{navigate_to_url, page_wait, random_page_wait, WaitUntil};
use crate::session::{Session, SessionOptions};
use crate::{Error, Result};

/// Correlation header sent with every request from the page.
pub const SESSION_HEADER: &str = "x-lpm-session";

/// Settling delay before instrumentation and before teardown, in ms.
const SETTLE_WAIT_MS: u64 = 500;

/// Bounds of the post-navigation wait that lets the target page finish its
/// own asynchronous fingerprinting.
const FINGERPRINT_WAIT_MIN_MS: u64 = 5_000;
const FINGERPRINT_WAIT_MAX_MS: u64 = 5_500;

/// A4 paper size in inches.
const PDF_PAPER_WIDTH_IN: f64 = 8.27;
const PDF_PAPER_HEIGHT_IN: f64 = 11.69;

/// Run identifier: UTC timestamp formatted `YYYYMMDD_HH_mm_ss`.
pub fn make_crawl_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H_%M_%S").to_string()
}

/// Create the per-run snapshot folder. Pre-existing parents are not an
/// error.
pub fn make_snapshot_folder(root: &Path, label: &str, crawl_id: &str) -> Result<PathBuf> {
    let folder = root.join(format!("{label}-{crawl_id}"));
    std::fs::create_dir_all(&folder)?;
    Ok(folder)
}

/// Result of one crawl run.
#[derive(Debug)]
pub struct CrawlReport {
    /// Run identifier, also embedded in the folder name and the
    /// correlation header.
    pub crawl_id: String,
    /// The snapshot folder this run wrote into.
    pub snapshot_folder: PathBuf,
    /// Whether the full sequence completed.
    pub success: bool,
    /// Error message if it did not.
    pub error: Option<String>,
    /// Save counts per capture file.
    pub captures: CaptureStats,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

/// Executes one capture run.
pub struct Crawler {
    session: Session,
    config: CrawlConfig,
}

impl Crawler {
    /// Validate the config and open the browser session.
    pub async fn new(config: CrawlConfig) -> Result<Self> {
        config.validate()?;

        let options = SessionOptions {
            user_agent: config.user_agent.clone(),
            platform: config.platform.clone(),
            proxy: config.proxy.clone(),
            debug: config.debug,
            timeout_ms: config.timeout_ms,
            ..Default::default()
        };
        let session = Session::open(options).await?;

        Ok(Self { session, config })
    }

    /// Run the capture sequence.
    ///
    /// The session is closed whether the sequence succeeds or fails; a
    /// failure is logged once and reported, never re-raised.
    pub async fn run(mut self) -> CrawlReport {
        let start = Instant::now();
        let crawl_id = make_crawl_id(Utc::now());

        let outcome = self.run_steps(&crawl_id).await;
        self.session.close().await;

        let (snapshot_folder, result) = outcome;
        match result {
            Ok(captures) => CrawlReport {
                crawl_id,
                snapshot_folder,
                success: true,
                error: None,
                captures,
                duration_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => {
                error!("Crawl failed: {e}");
                CrawlReport {
                    crawl_id,
                    snapshot_folder,
                    success: false,
                    error: Some(e.to_string()),
                    captures: CaptureStats::default(),
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        }
    }

    async fn run_steps(&mut self, crawl_id: &str) -> (PathBuf, Result<CaptureStats>) {
        let folder = match make_snapshot_folder(
            &self.config.snapshot_root,
            &self.config.label,
            crawl_id,
        ) {
            Ok(folder) => folder,
            Err(e) => return (self.config.snapshot_root.clone(), Err(e)),
        };

        let result = self.capture_into(crawl_id, &folder).await;
        (folder, result)
    }

    async fn capture_into(&mut self, crawl_id: &str, folder: &Path) -> Result<CaptureStats> {
        let mut headers = Map::new();
        headers.insert(
            SESSION_HEADER.to_string(),
            Value::String(crawl_id.to_string()),
        );
        self.session.append_headers(headers).await?;

        let user = self.config.proxy_user.clone();
        let password = self.config.proxy_password.clone();
        self.session
            .authenticate_proxy(user.as_deref(), password.as_deref())
            .await?;

        page_wait(self.session.page().ok(), SETTLE_WAIT_MS).await?;

        info!("Running tests..");

        let observer = ResponseObserver::attach(
            self.session.page()?,
            folder,
            vec![
                CaptureTarget::new(&self.config.fingerprint_url, "fingerprint.json"),
                CaptureTarget::new(&self.config.analysis_url, "analysis.json"),
            ],
        )
        .await?;

        let capture = async {
            navigate_to_url(
                self.session.page().ok(),
                &self.config.target_url,
                WaitUntil::NetworkIdle2,
                self.config.timeout_ms,
            )
            .await?;

            random_page_wait(
                self.session.page().ok(),
                FINGERPRINT_WAIT_MIN_MS,
                FINGERPRINT_WAIT_MAX_MS,
            )
            .await?;

            let page = self.session.page()?;

            page.save_screenshot(
                ScreenshotParams::builder().full_page(true).build(),
                folder.join("screenshot.png"),
            )
            .await?;
            info!("Saved screenshot..");

            page.save_pdf(
                PrintToPdfParams::builder()
                    .paper_width(PDF_PAPER_WIDTH_IN)
                    .paper_height(PDF_PAPER_HEIGHT_IN)
                    .build(),
                folder.join("printout.pdf"),
            )
            .await?;
            info!("Saved pdf printout..");

            let html = page.content().await?;
            tokio::fs::write(folder.join("content.html"), html).await?;
            info!("Saved html content..");

            page_wait(Some(page), SETTLE_WAIT_MS).await?;
            Ok::<(), Error>(())
        };

        let result = capture.await;

        // Drain any in-flight capture write before teardown, on both paths.
        let stats = observer.finish().await;
        result.map(|()| stats)
    }
}
