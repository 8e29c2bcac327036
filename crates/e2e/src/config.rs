//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// Top-level configuration, usually read from `webtests.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Browser session configuration
    pub browser: BrowserConfig,

    /// Books API and token endpoint configuration
    pub api: ApiSettings,

    /// Scheduling and cleanup policy
    pub run: RunConfig,

    /// Report output configuration
    pub report: ReportConfig,
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when absent.
    /// Environment overrides are applied afterwards.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let mut config = if path.exists() {
            debug!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)?
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> HarnessResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override secrets and endpoints from the environment
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WEBTESTS_CLIENT_ID") {
            self.api.client_id = v;
        }
        if let Some(v) = lookup("WEBTESTS_CLIENT_SECRET") {
            self.api.client_secret = v;
        }
        if let Some(v) = lookup("WEBTESTS_API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = lookup("WEBTESTS_TOKEN_URL") {
            self.api.token_url = v;
        }
        if let Some(v) = lookup("WEBTESTS_HEADLESS") {
            self.browser.headless = !matches!(v.as_str(), "0" | "false" | "no");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" => Ok(BrowserKind::Webkit),
            other => Err(HarnessError::Config(format!("unknown browser: {}", other))),
        }
    }
}

/// Configuration for browser sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub browser: BrowserKind,
    pub headless: bool,

    /// Extra arguments passed to the browser at launch
    pub launch_args: Vec<String>,

    pub viewport_width: u32,
    pub viewport_height: u32,
    pub ignore_https_errors: bool,

    /// Applies to every interaction issued through a session
    pub default_timeout_ms: u64,
    pub navigation_timeout_ms: u64,

    /// Upper bound on context + page creation and the entry navigation
    pub acquire_timeout_ms: u64,

    /// Page every session starts on
    pub entry_url: Option<String>,

    /// Selector of a consent banner button dismissed after the entry navigation
    pub cookie_consent_selector: Option<String>,

    pub screenshot_dir: PathBuf,

    /// `node` executable used to run the Playwright bridge
    pub node_binary: PathBuf,

    /// Extra module search path so the bridge can `require('playwright')`
    pub node_path: Option<PathBuf>,
}

impl BrowserConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser: BrowserKind::Chromium,
            headless: true,
            launch_args: vec![
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
            ],
            viewport_width: 1920,
            viewport_height: 1080,
            ignore_https_errors: true,
            default_timeout_ms: 30_000,
            navigation_timeout_ms: 30_000,
            acquire_timeout_ms: 60_000,
            entry_url: Some("https://en.ehuniversity.lt/".to_string()),
            cookie_consent_selector: Some(".cc-btn.cc-dismiss, .cc-btn.cc-allow, .cc-btn".to_string()),
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            node_binary: PathBuf::from("node"),
            node_path: None,
        }
    }
}

/// Books API and OAuth client-credentials settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub grant_type: String,

    /// Subtracted from the token expiry before it is considered stale
    pub token_safety_margin_secs: u64,

    pub request_timeout_ms: u64,
}

impl ApiSettings {
    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.token_safety_margin_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            token_url: "http://127.0.0.1:5000/connect/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: "books.read books.write".to_string(),
            grant_type: "client_credentials".to_string(),
            token_safety_margin_secs: 300,
            request_timeout_ms: 30_000,
        }
    }
}

/// When tracked resources are deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Once, after every test case finished
    #[default]
    PerRun,
    /// After each test case
    PerTest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of test cases executed concurrently
    pub workers: usize,
    pub cleanup: CleanupPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            cleanup: CleanupPolicy::PerRun,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub title: String,
    pub html: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("test-results"),
            title: "Test Execution Report".to_string(),
            html: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = HarnessConfig::from_toml(
            r#"
[api]
base_url = "https://books.example.test"
client_id = "suite"

[run]
workers = 4
cleanup = "per_test"
"#,
        )
        .unwrap();

        assert_eq!(config.api.base_url, "https://books.example.test");
        assert_eq!(config.api.client_id, "suite");
        assert_eq!(config.api.token_safety_margin_secs, 300);
        assert_eq!(config.run.workers, 4);
        assert_eq!(config.run.cleanup, CleanupPolicy::PerTest);
        assert_eq!(config.browser.default_timeout_ms, 30_000);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = HarnessConfig::default();
        config.apply_env(|key| match key {
            "WEBTESTS_CLIENT_SECRET" => Some("s3cret".to_string()),
            "WEBTESTS_HEADLESS" => Some("false".to_string()),
            _ => None,
        });

        assert_eq!(config.api.client_secret, "s3cret");
        assert!(!config.browser.headless);
        assert_eq!(config.api.client_id, "");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.run.workers, 1);
    }

    #[test]
    fn test_browser_kind_parse() {
        assert_eq!("Firefox".parse::<BrowserKind>().unwrap(), BrowserKind::Firefox);
        assert!("lynx".parse::<BrowserKind>().is_err());
    }
}
