//! Cache pruning
//!
//! Deletes every tagged image whose name contains a cache namespace.
//! Deletion is best-effort: an image that is in use or depended on must not
//! stop the rest from being removed.

use crate::error::{KilnError, KilnResult};
use crate::orchestration::ImageStore;
use tracing::{debug, warn};

/// Outcome of a prune run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Tags that were successfully deleted
    pub deleted: Vec<String>,
    /// Tags that could not be deleted, with the reason
    pub failed: Vec<(String, String)>,
}

impl PruneReport {
    /// Whether there was nothing to prune
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.failed.is_empty()
    }
}

/// List the cache entries that `prune` would delete
pub async fn matching_entries(store: &dyn ImageStore, prefix: &str) -> KilnResult<Vec<String>> {
    if prefix.is_empty() {
        return Err(KilnError::EmptyCachePrefix);
    }
    store.list_images(prefix).await
}

/// Delete the given cache entries, continuing past individual failures
pub async fn delete_entries(store: &dyn ImageStore, tags: &[String]) -> PruneReport {
    let mut report = PruneReport::default();

    for tag in tags {
        debug!("Deleting {}", tag);
        match store.delete_image(tag).await {
            Ok(()) => report.deleted.push(tag.clone()),
            Err(e) => {
                warn!("Failed to remove {} (might be in use or dependent): {}", tag, e);
                report.failed.push((tag.clone(), e.to_string()));
            }
        }
    }

    report
}

/// Delete every cache entry under `prefix`
pub async fn prune(store: &dyn ImageStore, prefix: &str) -> KilnResult<PruneReport> {
    let tags = matching_entries(store, prefix).await?;
    if tags.is_empty() {
        debug!("No cache layers found for prefix '{}'", prefix);
        return Ok(PruneReport::default());
    }
    Ok(delete_entries(store, &tags).await)
}
