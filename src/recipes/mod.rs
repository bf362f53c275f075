//! Valkey image recipes
//!
//! A recipe drives one `BuildSession` from the base image to a final tag
//! and closes the session on every path, success or failure.
//!
//! # Images
//!
//! | Recipe | Final tag | Cache namespace |
//! |--------|-----------|-----------------|
//! | core | `{project}-core:{version}` | `{project}/cache/core/{version}` |
//! | runtime | `{project}-runtime:{version}` | `{project}/cache/runtime/{version}` |
//! | module | `{project}-{stem}:{version}-{module version}` | `{project}/cache/{stem}/{module version}` |
//!
//! `stem` is the module name without its dash, e.g. `valkeyjson`.

mod core_image;
mod module_image;
mod runtime_image;

pub use core_image::build_core;
pub use module_image::build_module;
pub use runtime_image::build_runtime;

use crate::cache::StepOutcome;
use crate::config::{BuildSpec, ModuleKind, ModuleRef};
use crate::error::KilnResult;
use crate::orchestration::ImageStore;
use crate::ui::{self, UiContext};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Standard `PATH` with the valkey install prefix in front
pub(crate) fn path_with_prefix(prefix: &str) -> String {
    format!(
        "{}/bin:/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
        prefix
    )
}

/// Sorted copy, so list order in the build spec does not change cache keys
pub(crate) fn sorted(items: &[String]) -> Vec<String> {
    let mut items = items.to_vec();
    items.sort();
    items
}

/// Cache-key extras for a dependency install step
pub(crate) fn deps_extra(packages: &[String]) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("step".to_string(), Value::from("deps")),
        ("packages".to_string(), Value::from(sorted(packages))),
    ])
}

/// Which image a recipe produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipe {
    /// Compiled valkey under the install prefix
    Core,
    /// Minimal image running valkey as an unprivileged user
    Runtime,
    /// One optional module library, at a resolved version
    Module { kind: ModuleKind, version: String },
}

impl Recipe {
    /// Module recipe for the version `requested` resolves to
    pub fn module(spec: &BuildSpec, kind: ModuleKind, requested: &str) -> KilnResult<Self> {
        let (version, _) = spec.module(kind, requested)?;
        Ok(Self::Module {
            kind,
            version: version.to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Runtime => "runtime",
            Self::Module { kind, .. } => kind.stem(),
        }
    }

    fn version<'a>(&'a self, spec: &'a BuildSpec) -> &'a str {
        match self {
            Self::Core | Self::Runtime => &spec.valkey.version,
            Self::Module { version, .. } => version,
        }
    }

    /// Cache namespace used when no prefix is given
    pub fn default_namespace(&self, spec: &BuildSpec) -> String {
        format!(
            "{}/cache/{}/{}",
            spec.project_name,
            self.name(),
            self.version(spec)
        )
    }

    /// Cache namespace, preferring a non-empty override
    pub fn namespace(&self, spec: &BuildSpec, cache_prefix: Option<&str>) -> String {
        match cache_prefix {
            Some(prefix) if !prefix.is_empty() => prefix.to_string(),
            _ => self.default_namespace(spec),
        }
    }

    /// Repository name of the final image
    pub fn image_name(&self, spec: &BuildSpec) -> String {
        format!("{}-{}", spec.project_name, self.name())
    }

    /// Default tag of the final image
    pub fn image_tag(&self, spec: &BuildSpec) -> String {
        match self {
            Self::Core | Self::Runtime => spec.valkey.version.clone(),
            Self::Module { version, .. } => format!("{}-{}", spec.valkey.version, version),
        }
    }

    /// Working container name for this recipe's session
    pub fn working_name(&self, spec: &BuildSpec) -> String {
        format!("{}-{}-working", spec.project_name, self.name())
    }

    /// Build the image
    pub async fn build(
        &self,
        store: &dyn ImageStore,
        spec: &BuildSpec,
        options: &RecipeOptions,
        ctx: &UiContext,
    ) -> KilnResult<RecipeReport> {
        match self {
            Self::Core => build_core(store, spec, options, ctx).await,
            Self::Runtime => build_runtime(store, spec, options, ctx).await,
            Self::Module { kind, version } => {
                build_module(store, spec, *kind, version, options, ctx).await
            }
        }
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module { kind, version } => write!(f, "{} {}", kind, version),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Per-invocation overrides
#[derive(Debug, Clone)]
pub struct RecipeOptions {
    /// Cache namespace override
    pub cache_prefix: Option<String>,
    /// Final image repository override (runtime only)
    pub image_name: Option<String>,
    /// Final image tag override (runtime only)
    pub image_tag: Option<String>,
    /// Squash the final image into a single layer (runtime only)
    pub squash: bool,
    /// Strip the package manager before committing (runtime only)
    pub remove_package_manager: bool,
    /// Modules staged into the image (runtime only)
    pub modules: Vec<ModuleRef>,
}

impl Default for RecipeOptions {
    fn default() -> Self {
        Self {
            cache_prefix: None,
            image_name: None,
            image_tag: None,
            squash: true,
            remove_package_manager: false,
            modules: Vec::new(),
        }
    }
}

/// Result of a finished recipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeReport {
    /// Final image tag
    pub image: String,
    /// Cached steps served from existing layers
    pub cached: usize,
    /// Cached steps that ran and committed a new layer
    pub built: usize,
}

/// Step numbering and outcome bookkeeping for one recipe run
pub(crate) struct Progress<'c> {
    ctx: &'c UiContext,
    current: usize,
    total: usize,
    report: RecipeReport,
}

impl<'c> Progress<'c> {
    pub(crate) fn new(ctx: &'c UiContext, total: usize) -> Self {
        Self {
            ctx,
            current: 0,
            total,
            report: RecipeReport::default(),
        }
    }

    pub(crate) fn ctx(&self) -> &UiContext {
        self.ctx
    }

    /// Announce the next step
    pub(crate) fn step(&mut self, message: &str) {
        self.current += 1;
        ui::step_banner(self.ctx, self.current, self.total, message);
    }

    pub(crate) fn record(&mut self, outcome: &StepOutcome) {
        if outcome.was_cached() {
            self.report.cached += 1;
            ui::step_cached(self.ctx, outcome.key());
        } else {
            self.report.built += 1;
            ui::remark(self.ctx, &format!("Committed layer {}", outcome.tag()));
        }
    }

    pub(crate) fn record_optional(&mut self, outcome: Option<&StepOutcome>) {
        if let Some(outcome) = outcome {
            self.record(outcome);
        }
    }

    pub(crate) fn finish(self, image: String) -> RecipeReport {
        RecipeReport {
            image,
            ..self.report
        }
    }
}
