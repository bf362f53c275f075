//! Runtime image: core binaries plus an unprivileged valkey user
//!
//! Requested modules are copied out of their module images into a staging
//! directory and merged into the install prefix with rsync.

use super::{deps_extra, path_with_prefix, Progress, Recipe, RecipeOptions, RecipeReport};
use crate::cache::{BuildSession, SessionConfig};
use crate::config::{BuildSpec, ModuleKind, ModuleRef, ModuleVersion};
use crate::distro::PackageArgs;
use crate::error::{KilnError, KilnResult};
use crate::orchestration::{CommitOptions, ConfigChange, ImageStore};
use crate::ui::{self, UiContext};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

const TOTAL_STEPS: usize = 6;

const HOME_DIR: &str = "/var/lib/valkey";
const DATA_DIR: &str = "/var/lib/valkey/data";
const CONFIG_DIR: &str = "/usr/share/valkey/config";
const CONFIG_FILE: &str = "/usr/share/valkey/config/valkey.conf";
const ENTRYPOINT: &str = "/usr/local/bin/entrypoint.sh";

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Final tag, honoring `--name` and `--tag` overrides
pub(crate) fn image_tag(spec: &BuildSpec, options: &RecipeOptions) -> String {
    let name = options
        .image_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| Recipe::Runtime.image_name(spec));
    let tag = options
        .image_tag
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| spec.valkey.version.clone());
    format!("{}:{}", name, tag)
}

/// A requested module resolved against the build spec
struct StagedModule<'s> {
    kind: ModuleKind,
    version: &'s str,
    config: &'s ModuleVersion,
}

impl StagedModule<'_> {
    fn source_image(&self, spec: &BuildSpec) -> String {
        let recipe = Recipe::Module {
            kind: self.kind,
            version: self.version.to_string(),
        };
        format!("{}:{}", recipe.image_name(spec), recipe.image_tag(spec))
    }

    fn staging_dir(&self) -> String {
        format!("/tmp/stage_{}-{}", self.kind.stem(), self.version)
    }
}

fn resolve_modules<'s>(
    spec: &'s BuildSpec,
    requested: &[ModuleRef],
) -> KilnResult<Vec<StagedModule<'s>>> {
    let mut seen = BTreeSet::new();
    let mut modules = Vec::with_capacity(requested.len());
    for module in requested {
        if !seen.insert(module.kind) {
            return Err(KilnError::User(format!(
                "Module {} requested more than once",
                module.kind
            )));
        }
        let (version, config) = spec.module(module.kind, &module.version)?;
        modules.push(StagedModule {
            kind: module.kind,
            version,
            config,
        });
    }
    Ok(modules)
}

/// Build `{project}-runtime:{version}` from the core image
pub async fn build_runtime(
    store: &dyn ImageStore,
    spec: &BuildSpec,
    options: &RecipeOptions,
    ctx: &UiContext,
) -> KilnResult<RecipeReport> {
    let recipe = Recipe::Runtime;
    let image = image_tag(spec, options);
    let modules = resolve_modules(spec, &options.modules)?;
    let config = SessionConfig::new(
        spec.base_image.as_str(),
        recipe.working_name(spec),
        recipe.namespace(spec, options.cache_prefix.as_deref()),
    )
    .with_key_length(spec.cache.key_length);

    info!("Building {} (cache: {})", image, config.namespace);
    ui::intro(ctx, &format!("Building valkey {} runtime", spec.valkey.version));

    let mut session = BuildSession::open(store, config).await?;
    let total = TOTAL_STEPS + usize::from(!modules.is_empty());
    let mut progress = Progress::new(ctx, total);
    let result = run_steps(&mut session, spec, options, &modules, &image, &mut progress).await;
    session.close().await;
    if let Err(e) = result {
        ui::outro_error(ctx, &format!("Build of {} failed", image));
        return Err(e);
    }

    ui::outro_success(ctx, &format!("Image tagged as {}", image));
    Ok(progress.finish(image))
}

async fn run_steps(
    session: &mut BuildSession<'_>,
    spec: &BuildSpec,
    options: &RecipeOptions,
    modules: &[StagedModule<'_>],
    image: &str,
    progress: &mut Progress<'_>,
) -> KilnResult<()> {
    let valkey = &spec.valkey;
    let runtime = &valkey.runtime;
    let distro = spec.distro.distro();
    let args = PackageArgs::default();
    let owner = format!("{}:{}", runtime.uid, runtime.gid);

    progress.step("Retrieving valkey binaries");
    let core_image = format!(
        "{}:{}",
        Recipe::Core.image_name(spec),
        Recipe::Core.image_tag(spec)
    );
    session
        .copy_from_image(&core_image, &valkey.prefix, &valkey.prefix)
        .await?;

    progress.step("Installing runtime dependencies");
    distro.refresh_package_repository(session, &args).await?;
    let outcome = distro
        .install_packages(
            session,
            &runtime.dependencies,
            Some(deps_extra(&runtime.dependencies)),
            &args,
        )
        .await?;
    progress.record_optional(outcome.as_ref());

    if !modules.is_empty() {
        let names: Vec<String> = modules
            .iter()
            .map(|m| format!("{}={}", m.kind, m.version))
            .collect();
        progress.step(&format!("Installing modules {}", names.join(", ")));
        install_modules(session, spec, modules, progress).await?;
    }
    distro.clean_package_repository_cache(session, &args).await?;

    progress.step("Setting up system user");
    let gid = runtime.gid.to_string();
    let uid = runtime.uid.to_string();
    session
        .run_uncached(&argv(&["groupadd", "-r", "-g", gid.as_str(), "valkey"]), None)
        .await?;
    session
        .run_uncached(
            &argv(&[
                "useradd", "-r", "-u", uid.as_str(), "-g", gid.as_str(), "-d", HOME_DIR, "-s",
                "/sbin/nologin", "-c", "Valkey Server", "valkey",
            ]),
            None,
        )
        .await?;
    session
        .configure(&[
            ConfigChange::Label("io.valkey.user.uid".to_string(), uid.clone()),
            ConfigChange::Label("io.valkey.user.gid".to_string(), gid.clone()),
            ConfigChange::Label("io.valkey.user.name".to_string(), "valkey".to_string()),
        ])
        .await?;

    progress.step("Setting up directories and permissions");
    session
        .run_uncached(&argv(&["mkdir", "-p", DATA_DIR]), None)
        .await?;
    session
        .run_uncached(&argv(&["chown", "-R", owner.as_str(), HOME_DIR]), None)
        .await?;
    session
        .configure(&[
            ConfigChange::Env("VALKEY_DATA".to_string(), DATA_DIR.to_string()),
            ConfigChange::Volume(DATA_DIR.to_string()),
            ConfigChange::Env("PATH".to_string(), path_with_prefix(&valkey.prefix)),
        ])
        .await?;

    progress.step("Installing configuration and entrypoint");
    let resources = Path::new(&runtime.resources);
    session
        .run_uncached(&argv(&["mkdir", "-p", CONFIG_DIR]), None)
        .await?;
    session
        .copy_from_host(&resources.join("valkey.conf"), CONFIG_FILE)
        .await?;
    session
        .copy_from_host(&resources.join("entrypoint.sh"), ENTRYPOINT)
        .await?;
    session
        .run_uncached(&argv(&["chown", "-R", owner.as_str(), CONFIG_DIR, ENTRYPOINT]), None)
        .await?;
    session
        .run_uncached(&argv(&["chmod", "+x", ENTRYPOINT]), None)
        .await?;

    if options.remove_package_manager {
        distro.remove_package_manager(session).await?;
    }

    progress.step("Tagging image and adding metadata");
    let mut changes = vec![
        ConfigChange::Entrypoint(argv(&[ENTRYPOINT])),
        ConfigChange::Cmd(argv(&["valkey-server", CONFIG_FILE])),
        ConfigChange::User(uid),
        ConfigChange::Label("org.valkey.version".to_string(), valkey.version.clone()),
        ConfigChange::Label("org.valkey.prefix".to_string(), valkey.prefix.clone()),
    ];
    changes.extend(runtime.ports.iter().copied().map(ConfigChange::Port));
    changes.extend(modules.iter().map(|m| {
        ConfigChange::Label(format!("org.valkey.module.{}", m.kind), m.version.to_string())
    }));

    let commit = CommitOptions {
        squash: options.squash,
        ..Default::default()
    };
    session.commit_final(image, &changes, &commit).await
}

/// Stage each module's prefix tree and merge it into ours.
///
/// rsync is only present while modules are merged.
async fn install_modules(
    session: &mut BuildSession<'_>,
    spec: &BuildSpec,
    modules: &[StagedModule<'_>],
    progress: &mut Progress<'_>,
) -> KilnResult<()> {
    let distro = spec.distro.distro();
    let args = PackageArgs::default();
    let prefix = spec.valkey.prefix.as_str();
    let rsync = vec!["rsync".to_string()];

    let outcome = distro
        .install_packages(session, &rsync, Some(deps_extra(&rsync)), &args)
        .await?;
    progress.record_optional(outcome.as_ref());

    for module in modules {
        ui::step_info(
            progress.ctx(),
            &format!("Adding {} {}", module.kind.title(), module.version),
        );

        let dependencies = &module.config.runtime.dependencies;
        let outcome = distro
            .install_packages(session, dependencies, Some(deps_extra(dependencies)), &args)
            .await?;
        progress.record_optional(outcome.as_ref());

        let staging = module.staging_dir();
        session
            .copy_from_image(&module.source_image(spec), prefix, &staging)
            .await?;
        let from = format!("{}/", staging);
        let to = format!("{}/", prefix);
        session
            .run_uncached(
                &argv(&["rsync", "-a", "--ignore-existing", from.as_str(), to.as_str()]),
                None,
            )
            .await?;
        session
            .run_uncached(&argv(&["rm", "-rf", staging.as_str()]), None)
            .await?;
    }

    distro.remove_packages(session, &rsync, &args).await
}
