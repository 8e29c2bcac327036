//! Per-test execution contexts and their lifecycle

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::browser::{BrowserContext, BrowserEngine, ContextOptions, Page};
use crate::config::{ApiSettings, BrowserConfig};
use crate::credential::CredentialCache;
use crate::error::{HarnessError, HarnessResult};

/// Creates and tears down the context a single test case runs against
#[async_trait]
pub trait ContextProvider: Send + Sync {
    type Context: Send + Sync;

    /// Produce a ready-to-use context. Errors abort the test case.
    async fn acquire(&self) -> HarnessResult<Self::Context>;

    /// Tear the context down. Idempotent and infallible: problems are logged.
    async fn release(&self, context: &mut Self::Context);

    /// Snapshot the context for a failure report. Never fails.
    async fn capture_diagnostic(&self, context: &Self::Context, label: &str) -> Option<PathBuf>;
}

/// `<label>_<YYYYmmdd_HHMMSS>.png`, with whitespace and separators in the
/// label replaced by `_`
pub fn diagnostic_file_name(label: &str, at: DateTime<Local>) -> String {
    let label: String = label
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect();
    format!("{}_{}.png", label, at.format("%Y%m%d_%H%M%S"))
}

/// Run `fut` with a deadline, reporting an overrun as a timeout of `operation`
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> HarnessResult<T>
where
    F: Future<Output = HarnessResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(HarnessError::timeout(operation, limit.as_millis() as u64)),
    }
}

/// An isolated browser context plus its page
pub struct BrowserSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    page: Option<Box<dyn Page>>,
    context: Option<Box<dyn BrowserContext>>,
    timeout: Duration,
}

impl BrowserSession {
    pub fn is_released(&self) -> bool {
        self.page.is_none() && self.context.is_none()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn page(&self) -> HarnessResult<&dyn Page> {
        self.page
            .as_deref()
            .ok_or_else(|| HarnessError::Browser(format!("session {} is released", self.id)))
    }

    async fn run<T, F>(&self, operation: String, fut: F) -> HarnessResult<T>
    where
        F: Future<Output = HarnessResult<T>>,
    {
        with_timeout(&operation, self.timeout, fut).await
    }

    pub async fn goto(&self, url: &str) -> HarnessResult<()> {
        let page = self.page()?;
        self.run(format!("goto {}", url), page.goto(url)).await
    }

    pub async fn click(&self, selector: &str) -> HarnessResult<()> {
        let page = self.page()?;
        self.run(format!("click {}", selector), page.click(selector)).await
    }

    pub async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()> {
        let page = self.page()?;
        self.run(format!("fill {}", selector), page.fill(selector, value)).await
    }

    pub async fn press(&self, selector: &str, key: &str) -> HarnessResult<()> {
        let page = self.page()?;
        self.run(format!("press {} on {}", key, selector), page.press(selector, key))
            .await
    }

    pub async fn wait_for(&self, selector: &str) -> HarnessResult<()> {
        let page = self.page()?;
        self.run(format!("wait for {}", selector), page.wait_for(selector)).await
    }

    pub async fn text_content(&self, selector: &str) -> HarnessResult<Option<String>> {
        let page = self.page()?;
        self.run(format!("text of {}", selector), page.text_content(selector)).await
    }

    pub async fn count(&self, selector: &str) -> HarnessResult<usize> {
        let page = self.page()?;
        self.run(format!("count {}", selector), page.count(selector)).await
    }

    pub async fn title(&self) -> HarnessResult<String> {
        let page = self.page()?;
        self.run("title".to_string(), page.title()).await
    }

    pub async fn url(&self) -> HarnessResult<String> {
        let page = self.page()?;
        self.run("url".to_string(), page.url()).await
    }

    pub async fn screenshot(&self, path: &Path, full_page: bool) -> HarnessResult<()> {
        let page = self.page()?;
        self.run(format!("screenshot {}", path.display()), page.screenshot(path, full_page))
            .await
    }
}

/// Hands out one isolated [`BrowserSession`] per test case on a shared engine
pub struct BrowserSessionManager {
    engine: Arc<dyn BrowserEngine>,
    config: BrowserConfig,
}

impl BrowserSessionManager {
    pub fn new(engine: Arc<dyn BrowserEngine>, config: BrowserConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    fn context_options(&self) -> ContextOptions {
        ContextOptions {
            viewport_width: self.config.viewport_width,
            viewport_height: self.config.viewport_height,
            ignore_https_errors: self.config.ignore_https_errors,
            default_timeout_ms: self.config.default_timeout_ms,
            navigation_timeout_ms: self.config.navigation_timeout_ms,
        }
    }

    async fn open(&self, session: &mut BrowserSession) -> HarnessResult<()> {
        let context = self
            .engine
            .new_context(&self.context_options())
            .await
            .map_err(|e| HarnessError::Provisioning(format!("browser context: {}", e)))?;
        session.context = Some(context);

        let page = match session.context.as_deref() {
            Some(context) => context
                .new_page()
                .await
                .map_err(|e| HarnessError::Provisioning(format!("page: {}", e)))?,
            None => return Err(HarnessError::Provisioning("browser context vanished".to_string())),
        };
        session.page = Some(page);

        if let Some(entry_url) = &self.config.entry_url {
            session
                .goto(entry_url)
                .await
                .map_err(|e| HarnessError::Provisioning(format!("entry navigation: {}", e)))?;

            if let Some(selector) = &self.config.cookie_consent_selector {
                self.dismiss_consent(session, selector).await;
            }
        }
        Ok(())
    }

    async fn dismiss_consent(&self, session: &BrowserSession, selector: &str) {
        match session.count(selector).await {
            Ok(0) => {}
            Ok(_) => match session.click(selector).await {
                Ok(()) => debug!("Cookie consent handled"),
                Err(e) => warn!("Could not dismiss cookie consent: {}", e),
            },
            Err(e) => warn!("Cookie consent lookup failed: {}", e),
        }
    }
}

#[async_trait]
impl ContextProvider for BrowserSessionManager {
    type Context = BrowserSession;

    async fn acquire(&self) -> HarnessResult<BrowserSession> {
        let mut session = BrowserSession {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            page: None,
            context: None,
            timeout: self.config.default_timeout(),
        };

        let limit = self.config.acquire_timeout();
        let opened = match tokio::time::timeout(limit, self.open(&mut session)).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::Provisioning(format!(
                "session not ready within {} ms",
                limit.as_millis()
            ))),
        };

        match opened {
            Ok(()) => {
                debug!("Session {} acquired", session.id);
                Ok(session)
            }
            Err(e) => {
                self.release(&mut session).await;
                Err(e)
            }
        }
    }

    async fn release(&self, session: &mut BrowserSession) {
        if let Some(page) = session.page.take() {
            if let Err(e) = with_timeout("close page", session.timeout, page.close()).await {
                warn!("Session {}: closing page failed: {}", session.id, e);
            }
        }
        if let Some(context) = session.context.take() {
            if let Err(e) = with_timeout("close context", session.timeout, context.close()).await {
                warn!("Session {}: closing context failed: {}", session.id, e);
            }
            debug!("Session {} released", session.id);
        }
    }

    async fn capture_diagnostic(&self, session: &BrowserSession, label: &str) -> Option<PathBuf> {
        if session.page.is_none() {
            warn!("Session {} has no page to capture", session.id);
            return None;
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.config.screenshot_dir).await {
            warn!("Cannot create {}: {}", self.config.screenshot_dir.display(), e);
            return None;
        }

        let path = self
            .config
            .screenshot_dir
            .join(diagnostic_file_name(label, Local::now()));
        match session.screenshot(&path, true).await {
            Ok(()) => {
                info!("Screenshot saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Screenshot for '{}' failed: {}", label, e);
                None
            }
        }
    }
}

/// An authenticated client for one API test case
pub struct ApiSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub client: ApiClient,
    released: bool,
}

impl ApiSession {
    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// Hands out [`ApiSession`]s carrying a token from the shared cache
pub struct ApiSessionManager {
    credentials: Arc<CredentialCache>,
    settings: ApiSettings,
}

impl ApiSessionManager {
    pub fn new(credentials: Arc<CredentialCache>, settings: ApiSettings) -> Self {
        Self { credentials, settings }
    }
}

#[async_trait]
impl ContextProvider for ApiSessionManager {
    type Context = ApiSession;

    async fn acquire(&self) -> HarnessResult<ApiSession> {
        let token = self.credentials.get_token().await?;
        let client = ApiClient::new(&self.settings.base_url, token, self.settings.request_timeout())
            .map_err(|e| HarnessError::Provisioning(format!("http client: {}", e)))?;

        Ok(ApiSession {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            client,
            released: false,
        })
    }

    async fn release(&self, session: &mut ApiSession) {
        if !session.released {
            session.released = true;
            debug!("API session {} released", session.id);
        }
    }

    async fn capture_diagnostic(&self, session: &ApiSession, label: &str) -> Option<PathBuf> {
        debug!("No diagnostic snapshot for API session {} ({})", session.id, label);
        None
    }
}
