//! Build spec loading for kiln

pub mod modules;
pub mod schema;

pub use modules::{ModuleConfig, ModuleKind, ModuleRef, ModuleVersion};
pub use schema::BuildSpec;

use crate::error::{KilnError, KilnResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Default build spec location, relative to the working directory
pub const DEFAULT_SPEC_PATH: &str = "configs/build.toml";

/// Build spec manager
pub struct ConfigManager {
    spec_path: PathBuf,
}

impl ConfigManager {
    /// Create a new manager with the default spec path
    pub fn new() -> Self {
        Self {
            spec_path: PathBuf::from(DEFAULT_SPEC_PATH),
        }
    }

    /// Create a manager with a custom spec path
    pub fn with_path(path: PathBuf) -> Self {
        Self { spec_path: path }
    }

    /// Load and validate the build spec
    pub async fn load(&self) -> KilnResult<BuildSpec> {
        if !self.spec_path.exists() {
            return Err(KilnError::ConfigNotFound(self.spec_path.clone()));
        }

        let spec = self.load_from_file(&self.spec_path).await?;
        spec.validate().map_err(|reason| KilnError::ConfigInvalid {
            path: self.spec_path.clone(),
            reason,
        })?;

        debug!(
            "Loaded build spec for {} from {}",
            spec.project_name,
            self.spec_path.display()
        );
        Ok(spec)
    }

    /// Parse a build spec file without validating it
    pub async fn load_from_file(&self, path: &Path) -> KilnResult<BuildSpec> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| KilnError::io(format!("reading build spec from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| KilnError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Get the spec file path
    pub fn path(&self) -> &Path {
        &self.spec_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
