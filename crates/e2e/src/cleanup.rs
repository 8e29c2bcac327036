//! Tracking and deletion of resources created by test cases

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::ApiSettings;
use crate::credential::CredentialCache;
use crate::error::{HarnessError, HarnessResult};

/// Something durable a test created
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedResource {
    pub kind: String,
    pub id: String,
}

/// Result of one deletion attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub resource: TrackedResource,
    pub error: Option<String>,
}

impl CleanupOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Deletes tracked resources
#[async_trait]
pub trait ResourceDeleter: Send + Sync {
    async fn delete(&self, resource: &TrackedResource) -> HarnessResult<()>;
}

#[derive(Debug)]
struct Entry {
    owner: Option<String>,
    resource: TrackedResource,
}

#[derive(Debug, Default)]
pub struct CleanupRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resource right after it was created
    pub fn track(&self, kind: impl Into<String>, id: impl Into<String>) {
        self.push(None, kind.into(), id.into());
    }

    /// Record a resource on behalf of the named test case
    pub fn track_for(&self, owner: &str, kind: impl Into<String>, id: impl Into<String>) {
        self.push(Some(owner.to_string()), kind.into(), id.into());
    }

    fn push(&self, owner: Option<String>, kind: String, id: String) {
        let resource = TrackedResource { kind, id };
        debug!(
            "Tracking {} {} for {}",
            resource.kind,
            resource.id,
            owner.as_deref().unwrap_or("the run")
        );
        self.entries.lock().push(Entry { owner, resource });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn tracked(&self) -> Vec<TrackedResource> {
        self.entries.lock().iter().map(|e| e.resource.clone()).collect()
    }

    /// Attempt deletion of every tracked resource exactly once.
    ///
    /// Entries leave the registry before their deletion is attempted, so the
    /// registry is empty afterwards no matter how the attempts went.
    pub async fn drain_all(&self, deleter: &dyn ResourceDeleter) -> Vec<CleanupOutcome> {
        let drained: Vec<_> = std::mem::take(&mut *self.entries.lock())
            .into_iter()
            .map(|e| e.resource)
            .collect();
        delete_each(drained, deleter).await
    }

    /// Attempt deletion of the resources tracked for `owner` only.
    ///
    /// Resources other cases tracked stay in the registry untouched.
    pub async fn drain_for(&self, owner: &str, deleter: &dyn ResourceDeleter) -> Vec<CleanupOutcome> {
        let drained: Vec<_> = {
            let mut entries = self.entries.lock();
            let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *entries)
                .into_iter()
                .partition(|e| e.owner.as_deref() == Some(owner));
            *entries = rest;
            mine.into_iter().map(|e| e.resource).collect()
        };
        delete_each(drained, deleter).await
    }
}

async fn delete_each(drained: Vec<TrackedResource>, deleter: &dyn ResourceDeleter) -> Vec<CleanupOutcome> {
    if drained.is_empty() {
        return Vec::new();
    }

    info!("Cleaning up {} resource(s)", drained.len());
    let mut outcomes = Vec::with_capacity(drained.len());
    for resource in drained {
        let error = match deleter.delete(&resource).await {
            Ok(()) => {
                debug!("Deleted {} {}", resource.kind, resource.id);
                None
            }
            Err(e) => {
                warn!("Cleanup of {} {} failed: {}", resource.kind, resource.id, e);
                Some(e.to_string())
            }
        };
        outcomes.push(CleanupOutcome { resource, error });
    }
    outcomes
}

/// Deletes resources through `DELETE {base_url}/{kind}/{id}`
pub struct ApiResourceDeleter {
    credentials: Arc<CredentialCache>,
    settings: ApiSettings,
}

impl ApiResourceDeleter {
    pub fn new(credentials: Arc<CredentialCache>, settings: ApiSettings) -> Self {
        Self { credentials, settings }
    }

    fn cleanup_error(resource: &TrackedResource, reason: impl Into<String>) -> HarnessError {
        HarnessError::Cleanup {
            kind: resource.kind.clone(),
            id: resource.id.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ResourceDeleter for ApiResourceDeleter {
    async fn delete(&self, resource: &TrackedResource) -> HarnessResult<()> {
        let token = self
            .credentials
            .get_token()
            .await
            .map_err(|e| Self::cleanup_error(resource, e.to_string()))?;
        let client = ApiClient::new(&self.settings.base_url, token, self.settings.request_timeout())?;

        let response = client
            .delete(&format!("/{}/{}", resource.kind, resource.id))
            .await
            .map_err(|e| Self::cleanup_error(resource, e.to_string()))?;

        match response.status {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!("{} {} already gone", resource.kind, resource.id);
                Ok(())
            }
            status => Err(Self::cleanup_error(
                resource,
                format!("status {}: {}", status, response.body),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct CountingDeleter {
        attempts: Mutex<HashMap<TrackedResource, usize>>,
        fail_ids: Vec<String>,
    }

    #[async_trait]
    impl ResourceDeleter for CountingDeleter {
        async fn delete(&self, resource: &TrackedResource) -> HarnessResult<()> {
            *self.attempts.lock().entry(resource.clone()).or_default() += 1;
            if self.fail_ids.contains(&resource.id) {
                return Err(HarnessError::Cleanup {
                    kind: resource.kind.clone(),
                    id: resource.id.clone(),
                    reason: "stuck".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drain_attempts_each_resource_once_and_empties() {
        let registry = CleanupRegistry::new();
        registry.track("Books", "1");
        registry.track("Books", "2");
        registry.track("Users", "7");

        let deleter = CountingDeleter {
            fail_ids: vec!["2".to_string()],
            ..Default::default()
        };
        let outcomes = registry.drain_all(&deleter).await;

        assert_eq!(outcomes.len(), 3);
        assert!(registry.is_empty());
        assert!(deleter.attempts.lock().values().all(|&n| n == 1));

        let failed: Vec<_> = outcomes.iter().filter(|o| !o.succeeded()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].resource.id, "2");

        // A second drain has nothing left to attempt
        assert!(registry.drain_all(&deleter).await.is_empty());
        assert_eq!(deleter.attempts.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_drain_for_leaves_other_owners_alone() {
        let registry = CleanupRegistry::new();
        registry.track_for("Create book", "Books", "a");
        registry.track_for("Update book", "Books", "b");
        registry.track("Users", "shared");
        registry.track_for("Create book", "Books", "c");

        let deleter = CountingDeleter::default();
        let outcomes = registry.drain_for("Create book", &deleter).await;

        let ids: Vec<_> = outcomes.iter().map(|o| o.resource.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        let left: Vec<_> = registry.tracked().into_iter().map(|r| r.id).collect();
        assert_eq!(left, ["b", "shared"]);

        assert!(registry.drain_for("Create book", &deleter).await.is_empty());
        assert_eq!(registry.drain_all(&deleter).await.len(), 2);
        assert!(deleter.attempts.lock().values().all(|&n| n == 1));
    }

    #[tokio::test]
    async fn test_concurrent_tracking() {
        let registry = Arc::new(CleanupRegistry::new());
        let mut handles = Vec::new();
        for worker in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    registry.track("Books", format!("{}-{}", worker, i));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.len(), 200);
    }
}
