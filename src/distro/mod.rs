//! Distribution package-manager abstraction
//!
//! Each supported base distribution implements `Distro`; recipes select the
//! implementation from the build spec's `distro` value via `DistroKind`.

mod suse;

pub use suse::Suse;

use crate::cache::{BuildSession, StepOutcome};
use crate::error::KilnResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Extra flags appended to the package manager's defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageArgs {
    /// Global flags for every invocation
    pub flags: Vec<String>,
    pub install_flags: Vec<String>,
    pub remove_flags: Vec<String>,
    pub clean_flags: Vec<String>,
}

/// Package management inside a build session
#[async_trait]
pub trait Distro: Send + Sync {
    /// Refresh package repositories (uncached)
    async fn refresh_package_repository(
        &self,
        session: &mut BuildSession<'_>,
        args: &PackageArgs,
    ) -> KilnResult<()>;

    /// Install packages. Cached when `extra_cache_keys` is given, in which
    /// case the step outcome is returned.
    async fn install_packages(
        &self,
        session: &mut BuildSession<'_>,
        packages: &[String],
        extra_cache_keys: Option<BTreeMap<String, Value>>,
        args: &PackageArgs,
    ) -> KilnResult<Option<StepOutcome>>;

    /// Remove packages (uncached)
    async fn remove_packages(
        &self,
        session: &mut BuildSession<'_>,
        packages: &[String],
        args: &PackageArgs,
    ) -> KilnResult<()>;

    /// Drop downloaded package data (uncached)
    async fn clean_package_repository_cache(
        &self,
        session: &mut BuildSession<'_>,
        args: &PackageArgs,
    ) -> KilnResult<()>;

    /// Remove the package manager itself from the image (uncached)
    async fn remove_package_manager(&self, session: &mut BuildSession<'_>) -> KilnResult<()>;

    fn name(&self) -> &'static str;
}

/// Supported base distributions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistroKind {
    /// openSUSE / SLE (zypper)
    Suse,
}

static SUSE: Suse = Suse;

impl DistroKind {
    /// Implementation for this distribution
    pub fn distro(&self) -> &'static dyn Distro {
        match self {
            Self::Suse => &SUSE,
        }
    }
}

impl fmt::Display for DistroKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.distro().name())
    }
}
