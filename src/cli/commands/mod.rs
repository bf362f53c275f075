//! CLI command implementations

pub mod build;
pub mod cache;
pub mod key;

pub use build::{core, module, runtime};
pub use cache::prune;
pub use key::execute as key;

use crate::config::BuildSpec;
use crate::error::KilnResult;
use crate::orchestration::{BuildahStore, ImageStore, DEFAULT_BUILDAH_PATH};

/// Buildah store for the spec's configured executable, checked for availability
pub(crate) async fn open_store(spec: Option<&BuildSpec>) -> KilnResult<BuildahStore> {
    let path = spec.map_or(DEFAULT_BUILDAH_PATH, |s| s.buildah.path.as_str());
    let store = BuildahStore::new(path);
    store.ensure_available().await?;
    Ok(store)
}
