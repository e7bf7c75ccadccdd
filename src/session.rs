//! Session launcher.
//!
//! Builds the Chrome command line, launches the browser through
//! chromiumoxide, and hands back a [`Session`] owning the process and its
//! single page, configured to look like an ordinary desktop browser and
//! optionally routed through an upstream proxy.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::Page;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::prep::default_prep_steps;
use crate::{Error, Result};

/// Fixed browser window and viewport width.
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 2560;

/// Fixed browser window and viewport height.
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 1440;

/// Default navigation timeout in milliseconds.
pub const DEFAULT_NAV_TIMEOUT_MS: u64 = 40_000;

/// Inter-action delay applied in debug mode.
pub const SLOW_MO_MS: u64 = 225;

/// Fixed default desktop user agent (Chrome on Windows).
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";

/// Default navigator platform matching the default user agent.
pub const DEFAULT_PLATFORM: &str = "Win32";

/// Options for opening a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// User agent; `None` falls back to [`DEFAULT_USER_AGENT`].
    pub user_agent: Option<String>,
    /// Navigator platform; `None` falls back to [`DEFAULT_PLATFORM`].
    pub platform: Option<String>,
    /// Upstream proxy address (`host:port`).
    pub proxy: Option<String>,
    /// Headful browser with devtools and slowed-down actions.
    pub debug: bool,
    /// Navigation timeout in milliseconds. Must be nonzero.
    pub timeout_ms: u64,
    /// WebGL vendor reported by the vendor preparation step.
    pub vendor: String,
    /// Language list reported by the languages preparation step.
    pub languages: Option<Vec<String>>,
    /// Extra Chrome flags appended verbatim after the fixed set.
    pub extra_args: Vec<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            user_agent: None,
            platform: None,
            proxy: None,
            debug: false,
            timeout_ms: DEFAULT_NAV_TIMEOUT_MS,
            vendor: "Google Inc.".to_string(),
            languages: None,
            extra_args: vec!["--site-per-process".to_string()],
        }
    }
}

/// Build the Chrome command line.
///
/// The fixed set disables GPU acceleration, shared-memory usage, the setuid
/// sandbox and first-run UI, pins the window size and position, and ignores
/// TLS certificate errors including SPKI pinning (deliberate
/// trust-all-certificates policy so the crawl can run behind an intercepting
/// proxy). A `--proxy-server` flag is appended only when a proxy address is
/// supplied; caller flags come last, verbatim.
pub fn build_chrome_args(proxy: Option<&str>, extra_args: &[String]) -> Vec<String> {
    let mut args: Vec<String> = [
        "--disable-gpu",
        "--disable-dev-shm-usage",
        "--disable-setuid-sandbox",
        "--disable-infobars",
        "--no-first-run",
        "--no-sandbox",
        "--no-zygote",
        "--deterministic-fetch",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    if let Some(proxy) = proxy {
        args.push(format!("--proxy-server={proxy}"));
    }

    args.push(format!(
        "--window-size={DEFAULT_VIEWPORT_WIDTH},{DEFAULT_VIEWPORT_HEIGHT}"
    ));
    args.push("--window-position=0,0".to_string());
    args.push("--ignore-certificate-errors".to_string());
    args.push("--ignore-certificate-errors-spki-list".to_string());

    args.extend(extra_args.iter().cloned());
    args
}

/// Launch configuration, kept introspectable before it is handed to the
/// browser engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub args: Vec<String>,
    pub headless: bool,
    pub devtools: bool,
    /// Inter-action delay, set only in debug mode.
    pub slow_mo_ms: Option<u64>,
    pub timeout_ms: u64,
    pub ignore_https_errors: bool,
}

/// Build the launch configuration.
///
/// Debug mode runs headful with devtools open and a fixed slow-motion delay;
/// normal mode is headless with no devtools. Both trust all certificates and
/// carry the supplied timeout.
pub fn build_launch_spec(args: Vec<String>, debug_mode: bool, timeout_ms: u64) -> LaunchSpec {
    if debug_mode {
        LaunchSpec {
            args,
            headless: false,
            devtools: true,
            slow_mo_ms: Some(SLOW_MO_MS),
            timeout_ms,
            ignore_https_errors: true,
        }
    } else {
        LaunchSpec {
            args,
            headless: true,
            devtools: false,
            slow_mo_ms: None,
            timeout_ms,
            ignore_https_errors: true,
        }
    }
}

impl LaunchSpec {
    /// Convert into a chromiumoxide browser config.
    fn into_browser_config(self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .args(self.args)
            .request_timeout(Duration::from_millis(self.timeout_ms));

        if !self.headless {
            builder = builder.with_head();
        }
        if self.devtools {
            builder = builder.arg("--auto-open-devtools-for-tabs");
        }

        builder.build().map_err(Error::Launch)
    }
}

/// One live browser process and the single page it owns.
///
/// Both handles are released by [`Session::close`]; the crawl driver calls it
/// on every exit path, success or not.
#[derive(Debug)]
pub struct Session {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: JoinHandle<()>,
    proxy: Option<String>,
    extra_headers: Map<String, Value>,
    /// Delay applied before helper-driven interactions, set in debug mode.
    pub slow_mo: Option<Duration>,
}

impl Session {
    /// Launch the browser and open exactly one page, ready for navigation.
    ///
    /// Fails with [`Error::InvalidArgument`] on a zero timeout before
    /// anything is launched. The page gets the requested user agent (or the
    /// fixed desktop default), the fixed viewport, and network events
    /// enabled; enabled preparation steps run before the session is handed
    /// back.
    pub async fn open(options: SessionOptions) -> Result<Self> {
        if options.timeout_ms == 0 {
            return Err(Error::InvalidArgument(
                "timeout_ms must be a positive number of milliseconds".into(),
            ));
        }

        let args = build_chrome_args(options.proxy.as_deref(), &options.extra_args);
        let spec = build_launch_spec(args, options.debug, options.timeout_ms);
        let slow_mo = spec.slow_mo_ms.map(Duration::from_millis);

        debug!(
            headless = spec.headless,
            proxy = ?options.proxy,
            "Launching browser"
        );
        let (browser, mut handler) = Browser::launch(spec.into_browser_config()?).await?;

        // Drive the CDP connection for the life of the session.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;

        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let platform = options
            .platform
            .clone()
            .unwrap_or_else(|| DEFAULT_PLATFORM.to_string());

        let mut ua = SetUserAgentOverrideParams::new(user_agent);
        ua.platform = Some(platform);
        page.set_user_agent(ua).await?;

        page.execute(SetDeviceMetricsOverrideParams::new(
            i64::from(DEFAULT_VIEWPORT_WIDTH),
            i64::from(DEFAULT_VIEWPORT_HEIGHT),
            1.0,
            false,
        ))
        .await?;

        // Network events are what the response observer and idle waits feed on.
        page.execute(network::EnableParams::default()).await?;

        for step in default_prep_steps(&options) {
            if step.enabled() {
                debug!(step = step.name(), "Applying page preparation step");
                step.apply(&page).await?;
            }
        }

        info!("Browser session ready");

        Ok(Self {
            browser: Some(browser),
            page: Some(page),
            handler,
            proxy: options.proxy,
            extra_headers: Map::new(),
            slow_mo,
        })
    }

    /// The session's page.
    ///
    /// Fails with [`Error::MissingResource`] once the session is closed.
    pub fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| Error::MissingResource("page is required".into()))
    }

    /// The browser handle.
    pub fn browser(&self) -> Result<&Browser> {
        self.browser
            .as_ref()
            .ok_or_else(|| Error::MissingResource("browser is required".into()))
    }

    /// Merge headers into the set sent with every request from the page.
    ///
    /// CDP replaces the extra-header set wholesale on each call, so the
    /// session keeps the merged map and resubmits it in full.
    pub async fn append_headers(&mut self, headers: Map<String, Value>) -> Result<()> {
        self.extra_headers.extend(headers);
        let page = self.page()?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(Value::Object(
            self.extra_headers.clone(),
        ))))
        .await?;
        Ok(())
    }

    /// Submit proxy basic-auth credentials.
    ///
    /// A no-op unless a proxy address, a username and a password are all
    /// present. Returns whether credentials were submitted.
    pub async fn authenticate_proxy(
        &mut self,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<bool> {
        let (Some(_), Some(user), Some(password)) = (self.proxy.as_deref(), user, password) else {
            return Ok(false);
        };

        let token = BASE64.encode(format!("{user}:{password}"));
        let mut headers = Map::new();
        headers.insert(
            "Proxy-Authorization".to_string(),
            Value::String(format!("Basic {token}")),
        );
        self.append_headers(headers).await?;
        Ok(true)
    }

    /// Best-effort teardown: close the page if present, then the browser if
    /// present. Close errors are logged, never propagated.
    pub async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close page: {e}");
            }
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser: {e}");
            }
            if let Err(e) = browser.wait().await {
                warn!("Browser did not exit cleanly: {e}");
            }
        }
        self.handler.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_args_without_proxy() {
        let args = build_chrome_args(None, &[]);
        assert!(!args.iter().any(|a| a.starts_with("--proxy-server")));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.contains(&"--ignore-certificate-errors".to_string()));
        assert!(args.contains(&"--ignore-certificate-errors-spki-list".to_string()));
        assert!(args.contains(&"--window-size=2560,1440".to_string()));
        assert!(args.contains(&"--window-position=0,0".to_string()));
    }

    #[test]
    fn test_chrome_args_with_proxy() {
        let args = build_chrome_args(Some("127.0.0.1:24000"), &[]);
        assert!(args.contains(&"--proxy-server=127.0.0.1:24000".to_string()));
    }

    #[test]
    fn test_chrome_args_extra_flags_come_last() {
        let extra = vec!["--site-per-process".to_string(), "--mute-audio".to_string()];
        let args = build_chrome_args(None, &extra);
        let n = args.len();
        assert_eq!(&args[n - 2..], &extra[..]);
    }

    #[test]
    fn test_launch_spec_debug_mode() {
        let spec = build_launch_spec(vec![], true, 40_000);
        assert!(!spec.headless);
        assert!(spec.devtools);
        assert_eq!(spec.slow_mo_ms, Some(SLOW_MO_MS));
        assert!(spec.ignore_https_errors);
        assert_eq!(spec.timeout_ms, 40_000);
    }

    #[test]
    fn test_launch_spec_normal_mode() {
        let spec = build_launch_spec(vec![], false, 40_000);
        assert!(spec.headless);
        assert!(!spec.devtools);
        assert_eq!(spec.slow_mo_ms, None);
        assert!(spec.ignore_https_errors);
    }

    #[tokio::test]
    async fn test_open_rejects_zero_timeout() {
        let options = SessionOptions {
            timeout_ms: 0,
            ..Default::default()
        };
        let err = Session::open(options).await.unwrap_err();
        assert!(matches!(err, crate::Error::InvalidArgument(_)));
    }
}
