//! Core image: valkey compiled from source under the install prefix

use super::{deps_extra, path_with_prefix, sorted, Progress, Recipe, RecipeOptions, RecipeReport};
use crate::cache::{BuildSession, SessionConfig, StepRequest};
use crate::config::schema::ValkeyConfig;
use crate::config::BuildSpec;
use crate::distro::PackageArgs;
use crate::error::KilnResult;
use crate::orchestration::{CommitOptions, ConfigChange, ImageStore};
use crate::ui::{self, UiContext};
use tracing::info;

const TOTAL_STEPS: usize = 5;

fn tarball_path(valkey: &ValkeyConfig) -> String {
    format!("/tmp/valkey-{}.tar.gz", valkey.version)
}

fn source_dir(valkey: &ValkeyConfig) -> String {
    format!("/tmp/valkey-{}", valkey.version)
}

fn server_binary(valkey: &ValkeyConfig) -> String {
    format!("{}/bin/valkey-server", valkey.prefix)
}

/// Download and unpack the source tarball into /tmp
pub(crate) fn source_step(valkey: &ValkeyConfig) -> StepRequest {
    let tar_path = tarball_path(valkey);
    let src_dir = source_dir(valkey);
    let script = format!(
        "curl -fsSL -o {tar} '{url}' && tar -xf {tar} -C /tmp",
        tar = tar_path,
        url = valkey.source_url
    );
    StepRequest::new(["sh", "-c", script.as_str()])
        .extra("step", "source")
        .extra("url", valkey.source_url.as_str())
        .extra("src_dir", src_dir)
        .extra("tar_path", tar_path)
}

/// Compile and install into the prefix
pub(crate) fn compile_step(valkey: &ValkeyConfig) -> StepRequest {
    let mut make = String::from("make -j$(nproc)");
    for flag in &valkey.build.flags {
        make.push(' ');
        make.push_str(flag);
    }
    let script = format!(
        "cd {src} && {make} && make install PREFIX={prefix}",
        src = source_dir(valkey),
        make = make,
        prefix = valkey.prefix
    );
    StepRequest::new(["sh", "-c", script.as_str()])
        .extra("step", "compile")
        .extra("version", valkey.version.as_str())
        .extra("flags", sorted(&valkey.build.flags))
}

fn final_changes(valkey: &ValkeyConfig) -> Vec<ConfigChange> {
    vec![
        ConfigChange::Env("PATH".to_string(), path_with_prefix(&valkey.prefix)),
        ConfigChange::Label("org.valkey.version".to_string(), valkey.version.clone()),
        ConfigChange::Label("org.valkey.prefix".to_string(), valkey.prefix.clone()),
    ]
}

/// Build `{project}-core:{version}`
pub async fn build_core(
    store: &dyn ImageStore,
    spec: &BuildSpec,
    options: &RecipeOptions,
    ctx: &UiContext,
) -> KilnResult<RecipeReport> {
    let recipe = Recipe::Core;
    let image = format!("{}:{}", recipe.image_name(spec), recipe.image_tag(spec));
    let config = SessionConfig::new(
        spec.base_image.as_str(),
        recipe.working_name(spec),
        recipe.namespace(spec, options.cache_prefix.as_deref()),
    )
    .with_key_length(spec.cache.key_length);

    info!("Building {} (cache: {})", image, config.namespace);
    ui::intro(ctx, &format!("Building valkey {} core", spec.valkey.version));

    let mut session = BuildSession::open(store, config).await?;
    let mut progress = Progress::new(ctx, TOTAL_STEPS);
    let result = run_steps(&mut session, spec, &image, &mut progress).await;
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
    image: &str,
    progress: &mut Progress<'_>,
) -> KilnResult<()> {
    let valkey = &spec.valkey;
    let distro = spec.distro.distro();
    let args = PackageArgs::default();

    progress.step("Installing build dependencies");
    distro.refresh_package_repository(session, &args).await?;
    let outcome = distro
        .install_packages(
            session,
            &valkey.build.dependencies,
            Some(deps_extra(&valkey.build.dependencies)),
            &args,
        )
        .await?;
    progress.record_optional(outcome.as_ref());

    progress.step("Fetching valkey sources");
    let outcome = session.run_cached(&source_step(valkey)).await?;
    progress.record(&outcome);

    progress.step(&format!("Compiling valkey {}", valkey.version));
    let outcome = session.run_cached(&compile_step(valkey)).await?;
    progress.record(&outcome);

    progress.step("Verifying installation");
    let binary = server_binary(valkey);
    session
        .run_uncached(&["test".to_string(), "-x".to_string(), binary.clone()], None)
        .await?;
    let reported = session.capture(&[binary, "--version".to_string()]).await?;
    ui::key_value(progress.ctx(), "valkey-server", reported.trim());

    progress.step("Tagging image and adding metadata");
    session
        .commit_final(image, &final_changes(valkey), &CommitOptions::default())
        .await
}
