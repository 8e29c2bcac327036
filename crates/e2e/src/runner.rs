//! Main test runner that composes sessions, cleanup and result aggregation

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cleanup::{CleanupOutcome, CleanupRegistry, ResourceDeleter};
use crate::config::{CleanupPolicy, RunConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::report::{LogLevel, ResultAggregator, RunSummary, TestStatus};
use crate::session::ContextProvider;

/// What a test body sees besides its context
pub struct TestScope<'a> {
    name: &'a str,
    // Unique per case execution, duplicate names included
    owner: &'a str,
    registry: &'a CleanupRegistry,
    aggregator: &'a ResultAggregator,
}

impl<'a> TestScope<'a> {
    pub fn name(&self) -> &str {
        self.name
    }

    /// Register a created resource for deletion. Call it before asserting on
    /// anything about the resource.
    pub fn track(&self, kind: impl Into<String>, id: impl Into<String>) {
        self.registry.track_for(self.owner, kind, id);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.aggregator.log(self.name, LogLevel::Info, message.as_ref());
    }

    pub fn pass(&self, message: impl AsRef<str>) {
        self.aggregator.log(self.name, LogLevel::Pass, message.as_ref());
    }

    pub fn fail(&self, message: impl AsRef<str>) {
        self.aggregator.log(self.name, LogLevel::Fail, message.as_ref());
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.aggregator.log(self.name, LogLevel::Warning, message.as_ref());
    }
}

/// The body of a test case
#[async_trait]
pub trait TestBody<C: Send + Sync>: Send + Sync {
    async fn run(&self, context: &C, scope: &TestScope<'_>) -> HarnessResult<()>;
}

/// A named, categorized test body
pub struct TestCase<C> {
    pub name: String,
    pub category: String,
    pub tags: Vec<String>,
    pub body: Box<dyn TestBody<C>>,
}

impl<C: Send + Sync> TestCase<C> {
    pub fn new(name: impl Into<String>, category: impl Into<String>, body: impl TestBody<C> + 'static) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            tags: Vec::new(),
            body: Box::new(body),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Map the way a test body ended to its status
pub fn status_of(result: &HarnessResult<()>) -> TestStatus {
    match result {
        Ok(()) => TestStatus::Passed,
        Err(HarnessError::Skipped(_)) => TestStatus::Skipped,
        Err(HarnessError::Inconclusive(_)) => TestStatus::Inconclusive,
        Err(_) => TestStatus::Failed,
    }
}

fn reason_of(result: &HarnessResult<()>) -> Option<String> {
    match result {
        Ok(()) => None,
        Err(HarnessError::Skipped(reason)) | Err(HarnessError::Inconclusive(reason)) => Some(reason.clone()),
        Err(e) => Some(e.to_string()),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub cleanup: Vec<CleanupOutcome>,
    pub report_path: Option<PathBuf>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.summary.success()
    }

    pub fn cleanup_failures(&self) -> usize {
        self.cleanup.iter().filter(|o| !o.succeeded()).count()
    }
}

/// Main test runner.
///
/// Every case goes through the same wrapper: start is recorded, a context is
/// acquired, the body runs, a diagnostic is captured on failure, the outcome
/// is recorded and the context released.
pub struct TestRunner<P: ContextProvider> {
    provider: P,
    registry: Arc<CleanupRegistry>,
    deleter: Option<Arc<dyn ResourceDeleter>>,
    aggregator: ResultAggregator,
    config: RunConfig,
    cleanup: parking_lot::Mutex<Vec<CleanupOutcome>>,
    next_owner: AtomicU64,
}

impl<P: ContextProvider> TestRunner<P> {
    pub fn new(provider: P, config: RunConfig) -> Self {
        Self {
            provider,
            registry: Arc::new(CleanupRegistry::new()),
            deleter: None,
            aggregator: ResultAggregator::new(),
            config,
            cleanup: parking_lot::Mutex::new(Vec::new()),
            next_owner: AtomicU64::new(0),
        }
    }

    pub fn with_aggregator(mut self, aggregator: ResultAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_deleter(mut self, deleter: Arc<dyn ResourceDeleter>) -> Self {
        self.deleter = Some(deleter);
        self
    }

    pub fn registry(&self) -> Arc<CleanupRegistry> {
        self.registry.clone()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run cases on the configured number of workers. May be called more
    /// than once before [`finish`](Self::finish).
    pub async fn run(&self, cases: Vec<TestCase<P::Context>>) {
        let workers = self.config.workers.max(1);
        info!("Running {} test(s) on {} worker(s)...", cases.len(), workers);

        futures::stream::iter(cases)
            .map(|case| self.run_case(case))
            .buffer_unordered(workers)
            .collect::<Vec<()>>()
            .await;
    }

    /// Execute one case through the fixed acquire / run / record / release
    /// wrapper
    pub async fn run_case(&self, case: TestCase<P::Context>) {
        let name = case.name.as_str();
        self.aggregator.record_start(name, &case.category);
        let start = Instant::now();
        debug!("Running test: {}", name);

        let owner = format!("{}#{}", self.next_owner.fetch_add(1, Ordering::Relaxed), name);
        let mut context = None;
        let acquired = match AssertUnwindSafe(self.provider.acquire()).catch_unwind().await {
            Ok(acquired) => acquired,
            Err(payload) => Err(HarnessError::Provisioning(format!(
                "context acquisition panicked: {}",
                panic_message(payload)
            ))),
        };
        let result = match acquired {
            Ok(acquired) => {
                let acquired = context.insert(acquired);
                let scope = TestScope {
                    name,
                    owner: &owner,
                    registry: &self.registry,
                    aggregator: &self.aggregator,
                };
                match AssertUnwindSafe(case.body.run(acquired, &scope)).catch_unwind().await {
                    Ok(result) => result,
                    Err(payload) => Err(HarnessError::Assertion(format!(
                        "test body panicked: {}",
                        panic_message(payload)
                    ))),
                }
            }
            Err(e) => {
                warn!("Could not acquire a context for '{}': {}", name, e);
                Err(e)
            }
        };

        let status = status_of(&result);
        let reason = reason_of(&result);
        match (&status, &reason) {
            (TestStatus::Failed, Some(reason)) => self.aggregator.log(name, LogLevel::Fail, reason),
            (TestStatus::Skipped | TestStatus::Inconclusive, Some(reason)) => {
                self.aggregator.log(name, LogLevel::Skip, reason)
            }
            _ => {}
        }

        let mut artifact = None;
        if status == TestStatus::Failed {
            if let Some(acquired) = context.as_ref() {
                artifact = self.provider.capture_diagnostic(acquired, name).await;
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        self.aggregator
            .record_outcome(name, status, duration_ms, reason, artifact);

        if let Some(mut acquired) = context {
            self.provider.release(&mut acquired).await;
        }

        if self.config.cleanup == CleanupPolicy::PerTest {
            self.drain(Some(&owner)).await;
        }
    }

    /// Drain one case's resources, or everything when `owner` is `None`
    async fn drain(&self, owner: Option<&str>) {
        let Some(deleter) = &self.deleter else {
            if !self.registry.is_empty() {
                warn!("{} tracked resource(s) but no deleter configured", self.registry.len());
            }
            return;
        };
        let outcomes = match owner {
            Some(owner) => self.registry.drain_for(owner, deleter.as_ref()).await,
            None => self.registry.drain_all(deleter.as_ref()).await,
        };
        self.cleanup.lock().extend(outcomes);
    }

    /// Drain tracked resources, summarize, and flush the report
    pub async fn finish(self) -> RunReport {
        self.drain(None).await;

        let cleanup = self.cleanup.into_inner();
        let failures = cleanup.iter().filter(|o| !o.succeeded()).count();
        if failures > 0 {
            warn!("{} of {} cleanup attempt(s) failed", failures, cleanup.len());
        }

        let (summary, report_path) = self.aggregator.summarize();
        RunReport {
            summary,
            cleanup,
            report_path,
        }
    }
}
