//! WebTests execution core
//!
//! This crate drives browser and HTTP API test suites:
//! - Hands every test case its own execution context and always tears it down
//! - Caches the OAuth client-credentials token across test cases
//! - Tracks resources created by tests and deletes them after the run
//! - Aggregates outcomes into a run summary and an HTML report
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TestRunner                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run_case(case)                                             │
//! │    ├── aggregator.record_start(name, category)              │
//! │    ├── provider.acquire() -> Context                        │
//! │    ├── case.body.run(&context, &scope)                      │
//! │    │     └── scope.track(kind, id)  -> CleanupRegistry      │
//! │    ├── provider.capture_diagnostic()   (on failure)         │
//! │    ├── aggregator.record_outcome(...)                       │
//! │    └── provider.release(&mut context)                       │
//! │  finish()                                                   │
//! │    ├── registry.drain_all(deleter)                          │
//! │    └── aggregator.summarize() -> RunSummary + HTML report   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ContextProvider                                            │
//! │    ├── BrowserSessionManager (shared PlaywrightEngine)      │
//! │    └── ApiSessionManager     (CredentialCache + ApiClient)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod browser;
pub mod cleanup;
pub mod config;
pub mod credential;
pub mod error;
pub mod playwright;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod session;

pub use cleanup::{CleanupRegistry, ResourceDeleter, TrackedResource};
pub use config::HarnessConfig;
pub use credential::{Credential, CredentialCache};
pub use error::{HarnessError, HarnessResult};
pub use report::{ResultAggregator, RunSummary, TestOutcome, TestStatus};
pub use runner::{RunReport, TestBody, TestCase, TestRunner, TestScope};
pub use session::{ApiSession, ApiSessionManager, BrowserSession, BrowserSessionManager, ContextProvider};
