//! Build spec schema
//!
//! The build spec is stored at `configs/build.toml` by default

use super::modules::{ModuleConfig, ModuleKind, ModuleVersion};
use crate::cache::key::{DEFAULT_KEY_LENGTH, MAX_KEY_LENGTH};
use crate::distro::DistroKind;
use crate::error::{KilnError, KilnResult};
use crate::orchestration::DEFAULT_BUILDAH_PATH;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root build specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Project name, used in image and cache namespace names
    pub project_name: String,

    /// Image every session starts from
    pub base_image: String,

    /// Base image distribution
    pub distro: DistroKind,

    /// Backend settings
    #[serde(default)]
    pub buildah: BuildahConfig,

    /// Layer cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Valkey sources and build/runtime settings
    pub valkey: ValkeyConfig,

    /// Optional modules, keyed by module name
    #[serde(default)]
    pub modules: BTreeMap<ModuleKind, ModuleConfig>,
}

impl BuildSpec {
    /// Check values serde cannot express, returning the first problem found
    pub fn validate(&self) -> Result<(), String> {
        if self.project_name.trim().is_empty() {
            return Err("project_name must not be empty".to_string());
        }
        if self.base_image.trim().is_empty() {
            return Err("base_image must not be empty".to_string());
        }
        if self.buildah.path.trim().is_empty() {
            return Err("buildah.path must not be empty".to_string());
        }
        if self.valkey.version.trim().is_empty() {
            return Err("valkey.version must not be empty".to_string());
        }
        if self.valkey.source_url.trim().is_empty() {
            return Err("valkey.source_url must not be empty".to_string());
        }
        if !(DEFAULT_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&self.cache.key_length) {
            return Err(format!(
                "cache.key_length must be between {} and {}",
                DEFAULT_KEY_LENGTH, MAX_KEY_LENGTH
            ));
        }
        for (kind, module) in &self.modules {
            if module.versions.is_empty() {
                return Err(format!("modules.{} has no versions", kind));
            }
            if module.resolve(&module.current).is_none() {
                return Err(format!(
                    "modules.{}.current '{}' is not listed in its versions",
                    kind, module.current
                ));
            }
            for (version, config) in &module.versions {
                if config.source_url.trim().is_empty() {
                    return Err(format!(
                        "modules.{}.versions.{}.source_url must not be empty",
                        kind, version
                    ));
                }
                if config.build.cpu == 0 {
                    return Err(format!(
                        "modules.{}.versions.{}.build.cpu must be at least 1",
                        kind, version
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolve a requested module version (`latest` means `current`)
    pub fn module(&self, kind: ModuleKind, requested: &str) -> KilnResult<(&str, &ModuleVersion)> {
        let module = self
            .modules
            .get(&kind)
            .ok_or_else(|| KilnError::ModuleNotConfigured(kind.to_string()))?;
        module
            .resolve(requested)
            .ok_or_else(|| KilnError::UnknownModuleVersion {
                module: kind.to_string(),
                version: requested.to_string(),
            })
    }
}

/// Backend executable settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildahConfig {
    /// Path to the buildah executable
    pub path: String,
}

impl Default for BuildahConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_BUILDAH_PATH.to_string(),
        }
    }
}

/// Layer cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Hex characters of each step digest used in cache tags
    pub key_length: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_length: DEFAULT_KEY_LENGTH,
        }
    }
}

/// Valkey build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValkeyConfig {
    /// Version being built, also the final image tag
    pub version: String,

    /// Source tarball URL
    pub source_url: String,

    /// Install prefix inside the image
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn default_prefix() -> String {
    "/usr/local/valkey".to_string()
}

/// Compile-time settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Packages needed to compile
    pub dependencies: Vec<String>,

    /// Extra make flags
    pub flags: Vec<String>,
}

/// Runtime image settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Packages needed at runtime
    pub dependencies: Vec<String>,

    /// Host directory holding valkey.conf and entrypoint.sh
    pub resources: String,

    /// UID of the valkey system user
    pub uid: u32,

    /// GID of the valkey system group
    pub gid: u32,

    /// Ports exposed by the runtime image
    pub ports: Vec<u16>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dependencies: Vec::new(),
            resources: "resources".to_string(),
            uid: 26,
            gid: 26,
            ports: Vec::new(),
        }
    }
}
