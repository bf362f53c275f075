//! Image store abstraction
//!
//! Provides a trait for every operation kiln issues against an external
//! image-building backend. Implementations are the only code that spawns
//! backend processes.

use crate::error::KilnResult;
use crate::orchestration::images::{CommitOptions, ConfigChange};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// Abstract image store interface
///
/// Working containers are addressed by a fixed logical name; images by
/// their `name:tag` string.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Check that the backend executable can be invoked
    async fn ensure_available(&self) -> KilnResult<()>;

    /// Create a working container named `name` from `from_image`.
    ///
    /// A stale container holding the same name is removed and creation is
    /// retried once.
    async fn create_container(&self, from_image: &str, name: &str) -> KilnResult<()>;

    /// Remove a working container. Failures are logged and swallowed.
    async fn remove_container(&self, name: &str);

    /// Whether a tagged image exists. Query failures count as "no".
    async fn image_exists(&self, tag: &str) -> bool;

    /// Run a command inside the working container, streaming its output
    async fn execute(
        &self,
        name: &str,
        command: &[String],
        env: Option<&BTreeMap<String, String>>,
    ) -> KilnResult<()>;

    /// Run a command inside the working container and return its stdout
    async fn execute_capture(&self, name: &str, command: &[String]) -> KilnResult<String>;

    /// Apply pending image configuration to the working container
    async fn configure(&self, name: &str, changes: &[ConfigChange]) -> KilnResult<()>;

    /// Copy a host path into the working container
    async fn copy_from_host(&self, name: &str, host_path: &Path, dest: &str) -> KilnResult<()>;

    /// Copy a path out of another image into the working container
    async fn copy_from_image(
        &self,
        source_image: &str,
        name: &str,
        src: &str,
        dest: &str,
    ) -> KilnResult<()>;

    /// Snapshot the working container as a tagged image
    async fn commit(&self, name: &str, tag: &str, options: &CommitOptions) -> KilnResult<()>;

    /// List every image name containing `prefix`
    async fn list_images(&self, prefix: &str) -> KilnResult<Vec<String>>;

    /// Delete a tagged image. An image that is already gone is not an error.
    async fn delete_image(&self, tag: &str) -> KilnResult<()>;

    /// Get the human-readable backend name for display
    fn backend_name(&self) -> &'static str;
}
