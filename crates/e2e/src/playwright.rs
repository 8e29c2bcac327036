//! Playwright browser automation
//!
//! A long-lived `node` process runs a small bridge script that owns the
//! Playwright browser. Requests and responses travel as one JSON object per
//! line over the child's stdin/stdout; every request carries an id so that
//! sessions running concurrently can share the same bridge.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::browser::{BrowserContext, BrowserEngine, ContextOptions, Page};
use crate::config::BrowserConfig;
use crate::error::{HarnessError, HarnessResult};

/// How long the bridge gets to answer `shutdown` and then to exit
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

const BRIDGE_SCRIPT: &str = r#"
const playwright = require('playwright');
const readline = require('readline');

const options = JSON.parse(process.env.WEBTESTS_BRIDGE_OPTIONS || '{}');
const reply = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

(async () => {
  const browser = await playwright[options.browser || 'chromium'].launch({
    headless: options.headless !== false,
    args: options.args || [],
  });
  const contexts = new Map();
  const pages = new Map();
  let nextHandle = 1;

  const page = (p) => {
    const found = pages.get(p.page);
    if (!found) throw new Error(`unknown page handle ${p.page}`);
    return found;
  };

  const handlers = {
    newContext: async (p) => {
      const ctx = await browser.newContext({
        viewport: { width: p.viewportWidth, height: p.viewportHeight },
        ignoreHTTPSErrors: p.ignoreHttpsErrors,
      });
      ctx.setDefaultTimeout(p.defaultTimeoutMs);
      ctx.setDefaultNavigationTimeout(p.navigationTimeoutMs);
      const handle = nextHandle++;
      contexts.set(handle, ctx);
      return { handle };
    },
    newPage: async (p) => {
      const ctx = contexts.get(p.context);
      if (!ctx) throw new Error(`unknown context handle ${p.context}`);
      const created = await ctx.newPage();
      const handle = nextHandle++;
      pages.set(handle, created);
      return { handle };
    },
    goto: async (p) => { await page(p).goto(p.url); return {}; },
    click: async (p) => { await page(p).locator(p.selector).first().click(); return {}; },
    fill: async (p) => { await page(p).locator(p.selector).first().fill(p.value); return {}; },
    press: async (p) => { await page(p).locator(p.selector).first().press(p.key); return {}; },
    waitFor: async (p) => { await page(p).locator(p.selector).first().waitFor({ state: 'visible' }); return {}; },
    textContent: async (p) => {
      const locator = page(p).locator(p.selector);
      if (await locator.count() === 0) return { text: null };
      return { text: await locator.first().textContent() };
    },
    count: async (p) => ({ count: await page(p).locator(p.selector).count() }),
    title: async (p) => ({ title: await page(p).title() }),
    url: async (p) => ({ url: page(p).url() }),
    screenshot: async (p) => { await page(p).screenshot({ path: p.path, fullPage: p.fullPage }); return {}; },
    closePage: async (p) => {
      const found = pages.get(p.page);
      pages.delete(p.page);
      if (found) await found.close();
      return {};
    },
    closeContext: async (p) => {
      const found = contexts.get(p.context);
      contexts.delete(p.context);
      if (found) await found.close();
      return {};
    },
    shutdown: async () => {
      await browser.close();
      setImmediate(() => process.exit(0));
      return {};
    },
  };

  const rl = readline.createInterface({ input: process.stdin });
  rl.on('line', async (line) => {
    let req;
    try { req = JSON.parse(line); } catch (e) { return; }
    const handler = handlers[req.op];
    try {
      if (!handler) throw new Error(`unknown op ${req.op}`);
      const result = await handler(req.params || {});
      reply({ id: req.id, ok: true, result });
    } catch (error) {
      reply({ id: req.id, ok: false, error: error.message, timeout: error.name === 'TimeoutError' });
    }
  });
  rl.on('close', async () => { await browser.close(); process.exit(0); });

  reply({ id: 0, ok: true, result: { ready: true } });
})().catch((error) => {
  reply({ id: 0, ok: false, error: error.message });
  process.exit(1);
});
"#;

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    op: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    timeout: bool,
}

impl BridgeResponse {
    fn into_result(self, op: &str, timeout_ms: u64) -> HarnessResult<Value> {
        if self.ok {
            return Ok(self.result);
        }
        let message = self.error.unwrap_or_else(|| "unknown bridge error".to_string());
        if self.timeout {
            Err(HarnessError::timeout(format!("{}: {}", op, message), timeout_ms))
        } else {
            Err(HarnessError::Browser(format!("{}: {}", op, message)))
        }
    }
}

#[derive(Debug, Serialize)]
struct LaunchOptions<'a> {
    browser: &'a str,
    headless: bool,
    args: &'a [String],
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeResponse>>>>;

/// Removes a request's pending slot when its call finishes or is dropped
struct PendingSlot<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Connection to the node bridge process
struct Bridge {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    pending: Pending,
    next_id: AtomicU64,
    closed: AtomicBool,
    // Cleared by the reader task once the bridge's stdout ends
    alive: Arc<AtomicBool>,
    timeout_ms: u64,
    shutdown_grace: std::time::Duration,
    // Holds the bridge script for the lifetime of the process
    _script_dir: tempfile::TempDir,
}

impl Bridge {
    async fn call(&self, op: &str, params: Value) -> HarnessResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HarnessError::Browser(format!("{}: engine is closed", op)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            id,
        };
        if !self.alive.load(Ordering::SeqCst) {
            return Err(HarnessError::Browser(format!("{}: bridge exited", op)));
        }

        let mut line = serde_json::to_string(&BridgeRequest { id, op, params })?;
        line.push('\n');

        debug!("bridge -> {} #{}", op, id);
        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            return Err(HarnessError::Browser(format!("{}: bridge write failed: {}", op, e)));
        }

        let response = rx
            .await
            .map_err(|_| HarnessError::Browser(format!("{}: bridge exited", op)))?;
        response.into_result(op, self.timeout_ms)
    }
}

fn handle_of(value: &Value) -> HarnessResult<u64> {
    value
        .get("handle")
        .and_then(Value::as_u64)
        .ok_or_else(|| HarnessError::Browser(format!("bridge returned no handle: {}", value)))
}

/// Playwright-backed [`BrowserEngine`]
pub struct PlaywrightEngine {
    bridge: Arc<Bridge>,
}

impl PlaywrightEngine {
    /// Start the bridge and launch the configured browser
    pub async fn launch(config: &BrowserConfig) -> HarnessResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let options = serde_json::to_string(&LaunchOptions {
            browser: config.browser.as_str(),
            headless: config.headless,
            args: &config.launch_args,
        })?;

        info!(
            "Launching {} (headless: {}) via {}",
            config.browser.as_str(),
            config.headless,
            config.node_binary.display()
        );

        let mut cmd = Command::new(&config.node_binary);
        cmd.arg(&script_path)
            .env("WEBTESTS_BRIDGE_OPTIONS", options)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = &config.node_path {
            cmd.env("NODE_PATH", node_path);
        }

        let mut child = cmd.spawn().map_err(|e| {
            HarnessError::Provisioning(format!(
                "failed to spawn {}: {}",
                config.node_binary.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Provisioning("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Provisioning("bridge stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("[playwright] {}", line);
                }
            });
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (ready_tx, ready_rx) = oneshot::channel();
        pending.lock().insert(0, ready_tx);

        let alive = Arc::new(AtomicBool::new(true));
        let reader_alive = alive.clone();
        let reader_pending = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<BridgeResponse>(&line) {
                    Ok(response) => {
                        if let Some(tx) = reader_pending.lock().remove(&response.id) {
                            let _ = tx.send(response);
                        }
                    }
                    Err(_) => debug!("[playwright] {}", line),
                }
            }
            // Fail everything still waiting
            reader_alive.store(false, Ordering::SeqCst);
            reader_pending.lock().clear();
        });

        let ready = tokio::time::timeout(config.acquire_timeout(), ready_rx)
            .await
            .map_err(|_| {
                HarnessError::Provisioning(format!(
                    "browser did not start within {} ms",
                    config.acquire_timeout_ms
                ))
            })?
            .map_err(|_| HarnessError::Provisioning("bridge exited during startup".to_string()))?;
        if !ready.ok {
            return Err(HarnessError::Provisioning(
                ready.error.unwrap_or_else(|| "browser launch failed".to_string()),
            ));
        }

        info!("Browser ready");

        Ok(Self {
            bridge: Arc::new(Bridge {
                stdin: tokio::sync::Mutex::new(stdin),
                child: tokio::sync::Mutex::new(child),
                pending,
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                alive,
                timeout_ms: config.default_timeout_ms,
                shutdown_grace: SHUTDOWN_GRACE,
                _script_dir: script_dir,
            }),
        })
    }
}

#[async_trait]
impl BrowserEngine for PlaywrightEngine {
    async fn new_context(&self, options: &ContextOptions) -> HarnessResult<Box<dyn BrowserContext>> {
        let result = self.bridge.call("newContext", serde_json::to_value(options)?).await?;
        Ok(Box::new(PlaywrightContext {
            bridge: self.bridge.clone(),
            handle: handle_of(&result)?,
        }))
    }

    async fn close(&self) -> HarnessResult<()> {
        if self.bridge.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let grace = self.bridge.shutdown_grace;
        match tokio::time::timeout(grace, self.bridge.call("shutdown", json!({}))).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Browser shutdown failed: {}", e),
            Err(_) => warn!("Bridge did not answer shutdown within {:?}", grace),
        }
        self.bridge.closed.store(true, Ordering::SeqCst);

        let mut child = self.bridge.child.lock().await;
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("Bridge did not exit, killing it");
                child.kill().await?;
            }
        }
        info!("Browser closed");
        Ok(())
    }
}

struct PlaywrightContext {
    bridge: Arc<Bridge>,
    handle: u64,
}

#[async_trait]
impl BrowserContext for PlaywrightContext {
    async fn new_page(&self) -> HarnessResult<Box<dyn Page>> {
        let result = self
            .bridge
            .call("newPage", json!({ "context": self.handle }))
            .await?;
        Ok(Box::new(PlaywrightPage {
            bridge: self.bridge.clone(),
            handle: handle_of(&result)?,
        }))
    }

    async fn close(&self) -> HarnessResult<()> {
        self.bridge
            .call("closeContext", json!({ "context": self.handle }))
            .await?;
        Ok(())
    }
}

struct PlaywrightPage {
    bridge: Arc<Bridge>,
    handle: u64,
}

impl PlaywrightPage {
    async fn call(&self, op: &str, mut params: Value) -> HarnessResult<Value> {
        params["page"] = json!(self.handle);
        self.bridge.call(op, params).await
    }

    fn string_field(value: &Value, field: &str) -> String {
        value
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl Page for PlaywrightPage {
    async fn goto(&self, url: &str) -> HarnessResult<()> {
        self.call("goto", json!({ "url": url })).await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> HarnessResult<()> {
        self.call("click", json!({ "selector": selector })).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()> {
        self.call("fill", json!({ "selector": selector, "value": value }))
            .await?;
        Ok(())
    }

    async fn press(&self, selector: &str, key: &str) -> HarnessResult<()> {
        self.call("press", json!({ "selector": selector, "key": key }))
            .await?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str) -> HarnessResult<()> {
        self.call("waitFor", json!({ "selector": selector })).await?;
        Ok(())
    }

    async fn text_content(&self, selector: &str) -> HarnessResult<Option<String>> {
        let result = self.call("textContent", json!({ "selector": selector })).await?;
        Ok(result.get("text").and_then(Value::as_str).map(String::from))
    }

    async fn count(&self, selector: &str) -> HarnessResult<usize> {
        let result = self.call("count", json!({ "selector": selector })).await?;
        Ok(result.get("count").and_then(Value::as_u64).unwrap_or(0) as usize)
    }

    async fn title(&self) -> HarnessResult<String> {
        let result = self.call("title", json!({})).await?;
        Ok(Self::string_field(&result, "title"))
    }

    async fn url(&self) -> HarnessResult<String> {
        let result = self.call("url", json!({})).await?;
        Ok(Self::string_field(&result, "url"))
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> HarnessResult<()> {
        self.call(
            "screenshot",
            json!({ "path": path.to_string_lossy(), "fullPage": full_page }),
        )
        .await?;
        Ok(())
    }

    async fn close(&self) -> HarnessResult<()> {
        self.call("closePage", json!({})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_handles_every_page_operation() {
        for op in [
            "newContext", "newPage", "goto", "click", "fill", "press", "waitFor",
            "textContent", "count", "title", "url", "screenshot", "closePage",
            "closeContext", "shutdown",
        ] {
            assert!(
                BRIDGE_SCRIPT.contains(&format!("{}: async", op)),
                "bridge has no handler for {}",
                op
            );
        }
    }

    #[test]
    fn test_timeout_response_maps_to_timeout() {
        let response: BridgeResponse = serde_json::from_str(
            r#"{"id":7,"ok":false,"error":"locator.click: Timeout 30000ms exceeded","timeout":true}"#,
        )
        .unwrap();
        let err = response.into_result("click", 30_000).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_error_response_maps_to_browser_error() {
        let response: BridgeResponse =
            serde_json::from_str(r#"{"id":3,"ok":false,"error":"unknown page handle 9"}"#).unwrap();
        match response.into_result("goto", 30_000) {
            Err(HarnessError::Browser(msg)) => assert!(msg.contains("unknown page handle")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    /// A bridge around a process that reads requests and never answers
    #[cfg(unix)]
    fn silent_bridge(grace_ms: u64) -> Bridge {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        Bridge {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            alive: Arc::new(AtomicBool::new(true)),
            timeout_ms: 1_000,
            shutdown_grace: std::time::Duration::from_millis(grace_ms),
            _script_dir: tempfile::tempdir().unwrap(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_call_frees_its_pending_slot() {
        let bridge = silent_bridge(100);
        let call = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            bridge.call("title", json!({ "page": 1 })),
        )
        .await;
        assert!(call.is_err());
        assert!(bridge.pending.lock().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_kills_a_bridge_that_ignores_shutdown() {
        let engine = PlaywrightEngine {
            bridge: Arc::new(silent_bridge(100)),
        };

        tokio::time::timeout(std::time::Duration::from_secs(3), engine.close())
            .await
            .expect("close finished within its grace periods")
            .unwrap();

        assert!(engine.bridge.pending.lock().is_empty());
        let status = engine.bridge.child.lock().await.try_wait().unwrap();
        assert!(status.is_some(), "bridge process still running");
        // Closed engines refuse further calls
        let options = ContextOptions {
            viewport_width: 800,
            viewport_height: 600,
            ignore_https_errors: false,
            default_timeout_ms: 1_000,
            navigation_timeout_ms: 1_000,
        };
        assert!(engine.new_context(&options).await.is_err());
    }

    #[test]
    fn test_context_options_use_bridge_field_names() {
        let options = ContextOptions {
            viewport_width: 1920,
            viewport_height: 1080,
            ignore_https_errors: true,
            default_timeout_ms: 30_000,
            navigation_timeout_ms: 15_000,
        };
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["viewportWidth"], 1920);
        assert_eq!(value["ignoreHttpsErrors"], true);
        assert_eq!(value["navigationTimeoutMs"], 15_000);
    }
}
