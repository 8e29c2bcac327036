//! Browser automation capability consumed by the session manager

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::HarnessResult;

/// Options for an isolated browser context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextOptions {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub ignore_https_errors: bool,
    pub default_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
}

/// A launched browser that hands out isolated contexts.
///
/// One engine is shared by all sessions of a run; everything it creates is
/// isolated from everything else it created.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn new_context(&self, options: &ContextOptions) -> HarnessResult<Box<dyn BrowserContext>>;

    async fn close(&self) -> HarnessResult<()>;
}

#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> HarnessResult<Box<dyn Page>>;

    async fn close(&self) -> HarnessResult<()>;
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str) -> HarnessResult<()>;

    async fn click(&self, selector: &str) -> HarnessResult<()>;

    async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()>;

    async fn press(&self, selector: &str, key: &str) -> HarnessResult<()>;

    /// Wait until `selector` is visible
    async fn wait_for(&self, selector: &str) -> HarnessResult<()>;

    /// Text of the first match, `None` when nothing matches
    async fn text_content(&self, selector: &str) -> HarnessResult<Option<String>>;

    async fn count(&self, selector: &str) -> HarnessResult<usize>;

    async fn title(&self) -> HarnessResult<String>;

    async fn url(&self) -> HarnessResult<String>;

    async fn screenshot(&self, path: &Path, full_page: bool) -> HarnessResult<()>;

    async fn close(&self) -> HarnessResult<()>;
}
