//! Run configuration.
//!
//! Everything the crawl needs is carried in one [`CrawlConfig`] value, set
//! once before the run and read-only during it. Defaults reproduce the
//! standard crawl; a YAML file or CLI flags can override any of it.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Default target: the creepjs bot-check page.
pub const DEFAULT_TARGET_URL: &str = "https://abrahamjuliot.github.io/creepjs/";

/// Endpoint the target page POSTs its fingerprint payload to.
pub const DEFAULT_FINGERPRINT_URL: &str = "https://creepjs-api.web.app/fp";

/// Endpoint the target page POSTs its analysis payload to.
pub const DEFAULT_ANALYSIS_URL: &str = "https://creepjs-api.web.app/analysis";

/// Default upstream proxy address.
pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1:24000";

/// Configuration for one crawl run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrawlConfig {
    /// URL the crawl navigates to.
    #[serde(default = "default_target_url")]
    pub target_url: String,

    /// Fingerprint endpoint, matched by exact URL equality against POST
    /// responses.
    #[serde(default = "default_fingerprint_url")]
    pub fingerprint_url: String,

    /// Analysis endpoint, matched the same way.
    #[serde(default = "default_analysis_url")]
    pub analysis_url: String,

    /// Upstream proxy address, or none to connect directly.
    #[serde(default = "default_proxy")]
    pub proxy: Option<String>,

    /// Proxy basic-auth username.
    #[serde(default)]
    pub proxy_user: Option<String>,

    /// Proxy basic-auth password.
    #[serde(default)]
    pub proxy_password: Option<String>,

    /// Headful browser with devtools and slowed-down actions.
    #[serde(default)]
    pub debug: bool,

    /// Navigation timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Root directory snapshot folders are created under.
    #[serde(default = "default_snapshot_root")]
    pub snapshot_root: PathBuf,

    /// Snapshot folder prefix; the folder is `<root>/<label>-<run id>`.
    #[serde(default = "default_label")]
    pub label: String,

    /// User agent override. Falls back to a fixed desktop Chrome-on-Windows
    /// string.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Navigator platform reported alongside the user agent.
    #[serde(default)]
    pub platform: Option<String>,
}

fn default_target_url() -> String {
    DEFAULT_TARGET_URL.to_string()
}

fn default_fingerprint_url() -> String {
    DEFAULT_FINGERPRINT_URL.to_string()
}

fn default_analysis_url() -> String {
    DEFAULT_ANALYSIS_URL.to_string()
}

fn default_proxy() -> Option<String> {
    Some(DEFAULT_PROXY_HOST.to_string())
}

fn default_timeout_ms() -> u64 {
    40_000
}

fn default_snapshot_root() -> PathBuf {
    PathBuf::from("./snapshots")
}

fn default_label() -> String {
    "creepjs".to_string()
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            target_url: default_target_url(),
            fingerprint_url: default_fingerprint_url(),
            analysis_url: default_analysis_url(),
            proxy: default_proxy(),
            proxy_user: None,
            proxy_password: None,
            debug: false,
            timeout_ms: default_timeout_ms(),
            snapshot_root: default_snapshot_root(),
            label: default_label(),
            user_agent: None,
            platform: None,
        }
    }
}

impl CrawlConfig {
    /// Load config from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse config from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self> {
        let config: CrawlConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config.
    pub fn validate(&self) -> Result<()> {
        if self.target_url.is_empty() {
            return Err(Error::Config("target_url is required".into()));
        }
        if self.fingerprint_url.is_empty() || self.analysis_url.is_empty() {
            return Err(Error::Config(
                "fingerprint_url and analysis_url are required".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config(
                "timeout_ms must be a positive number of milliseconds".into(),
            ));
        }
        if self.label.is_empty() {
            return Err(Error::Config("label is required".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CrawlConfig::default();
        assert_eq!(config.target_url, DEFAULT_TARGET_URL);
        assert_eq!(config.proxy.as_deref(), Some(DEFAULT_PROXY_HOST));
        assert_eq!(config.timeout_ms, 40_000);
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_overrides() {
        let yaml = r#"
target_url: "https://example.com/"
proxy: null
debug: true
timeout_ms: 5000
snapshot_root: "/tmp/snaps"
"#;
        let config = CrawlConfig::parse(yaml).unwrap();
        assert_eq!(config.target_url, "https://example.com/");
        assert!(config.proxy.is_none());
        assert!(config.debug);
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.snapshot_root, PathBuf::from("/tmp/snaps"));
        // untouched fields keep their defaults
        assert_eq!(config.fingerprint_url, DEFAULT_FINGERPRINT_URL);
        assert_eq!(config.label, "creepjs");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let yaml = "timeout_ms: 0\n";
        let err = CrawlConfig::parse(yaml).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_target_rejected() {
        let yaml = "target_url: \"\"\n";
        assert!(CrawlConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "targetUrl: \"https://example.com\"\n";
        assert!(CrawlConfig::parse(yaml).is_err());
    }
}
