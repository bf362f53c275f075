//! Module images: one valkey module library built from its git tag

use super::{deps_extra, sorted, Progress, Recipe, RecipeOptions, RecipeReport};
use crate::cache::{BuildSession, SessionConfig, StepRequest};
use crate::config::{BuildSpec, ModuleKind, ModuleVersion};
use crate::distro::PackageArgs;
use crate::error::KilnResult;
use crate::orchestration::{CommitOptions, ConfigChange, ImageStore};
use crate::ui::{self, UiContext};
use tracing::info;

const TOTAL_STEPS: usize = 5;

fn source_dir(kind: ModuleKind, version: &str) -> String {
    format!("/tmp/{}-{}", kind.stem(), version)
}

/// Directory module libraries are installed to
pub(crate) fn module_dir(spec: &BuildSpec) -> String {
    format!("{}/modules", spec.valkey.prefix)
}

/// Shallow clone of the version tag
pub(crate) fn clone_step(kind: ModuleKind, version: &str, module: &ModuleVersion) -> StepRequest {
    let src_dir = source_dir(kind, version);
    StepRequest::new([
        "git",
        "clone",
        "--depth",
        "1",
        "--branch",
        version,
        module.source_url.as_str(),
        src_dir.as_str(),
    ])
    .extra("step", "source")
    .extra("url", module.source_url.as_str())
    .extra("version", version)
    .extra("src_dir", src_dir)
}

pub(crate) fn compile_step(
    spec: &BuildSpec,
    kind: ModuleKind,
    version: &str,
    module: &ModuleVersion,
) -> StepRequest {
    let script = kind.compile_script(&source_dir(kind, version), &module.build);
    StepRequest::new(["sh", "-c", script.as_str()])
        .extra("step", "compile")
        .extra("version", spec.valkey.version.as_str())
        .extra("module_version", version)
        .extra("flags", sorted(&module.build.flags))
        .extra("env", sorted(&module.build.env))
}

/// Build `{project}-{stem}:{valkey version}-{module version}`
pub async fn build_module(
    store: &dyn ImageStore,
    spec: &BuildSpec,
    kind: ModuleKind,
    requested: &str,
    options: &RecipeOptions,
    ctx: &UiContext,
) -> KilnResult<RecipeReport> {
    let (version, module) = spec.module(kind, requested)?;
    let recipe = Recipe::Module {
        kind,
        version: version.to_string(),
    };
    let image = format!("{}:{}", recipe.image_name(spec), recipe.image_tag(spec));
    let config = SessionConfig::new(
        spec.base_image.as_str(),
        recipe.working_name(spec),
        recipe.namespace(spec, options.cache_prefix.as_deref()),
    )
    .with_key_length(spec.cache.key_length);

    info!("Building {} (cache: {})", image, config.namespace);
    ui::intro(ctx, &format!("Building {} {}", kind.title(), version));

    let mut session = BuildSession::open(store, config).await?;
    let mut progress = Progress::new(ctx, TOTAL_STEPS);
    let result = run_steps(&mut session, spec, kind, version, module, &image, &mut progress).await;
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
    kind: ModuleKind,
    version: &str,
    module: &ModuleVersion,
    image: &str,
    progress: &mut Progress<'_>,
) -> KilnResult<()> {
    let distro = spec.distro.distro();
    let args = PackageArgs::default();
    let dependencies = &module.build.dependencies;

    progress.step("Installing build dependencies");
    if !dependencies.is_empty() {
        distro.refresh_package_repository(session, &args).await?;
        let outcome = distro
            .install_packages(session, dependencies, Some(deps_extra(dependencies)), &args)
            .await?;
        progress.record_optional(outcome.as_ref());
    }

    progress.step(&format!("Cloning {} tag {}", module.source_url, version));
    let outcome = session.run_cached(&clone_step(kind, version, module)).await?;
    progress.record(&outcome);

    progress.step("Compiling and installing");
    let outcome = session
        .run_cached(&compile_step(spec, kind, version, module))
        .await?;
    progress.record(&outcome);

    let target_dir = module_dir(spec);
    let library = format!("{}/{}", target_dir, kind.library());
    let install = format!(
        "find {} -name '*.so' -exec cp {{}} {} \\;",
        source_dir(kind, version),
        library
    );
    session
        .run_uncached(&["mkdir".to_string(), "-p".to_string(), target_dir], None)
        .await?;
    session
        .run_uncached(&["sh".to_string(), "-c".to_string(), install], None)
        .await?;

    progress.step("Verifying installation");
    session
        .run_uncached(&["test".to_string(), "-f".to_string(), library], None)
        .await?;

    progress.step("Tagging image and adding metadata");
    let changes = [
        ConfigChange::Label(
            "org.opencontainers.image.title".to_string(),
            format!("Valkey {} with {} {}", spec.valkey.version, kind.title(), version),
        ),
        ConfigChange::Label(format!("org.{}.version", kind.stem()), version.to_string()),
    ];
    session
        .commit_final(image, &changes, &CommitOptions::default())
        .await
}
