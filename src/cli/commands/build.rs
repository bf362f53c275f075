//! Core, runtime and module commands - build images or drop their cache

use super::cache::delete_cache;
use super::open_store;
use crate::cli::args::{
    CoreAction, CoreArgs, ModuleAction, ModuleArgs, RuntimeAction, RuntimeArgs, RuntimeBuildArgs,
};
use crate::config::BuildSpec;
use crate::error::KilnResult;
use crate::recipes::{Recipe, RecipeOptions, RecipeReport};
use crate::ui::{self, UiContext};

/// Execute the core command
pub async fn core(args: CoreArgs, spec: &BuildSpec, ctx: &UiContext) -> KilnResult<()> {
    match args.action {
        CoreAction::Build { cache_prefix } => {
            let options = RecipeOptions {
                cache_prefix,
                ..Default::default()
            };
            build(Recipe::Core, spec, &options, ctx).await
        }
        CoreAction::DeleteCache(args) => delete_cache(Recipe::Core, args, spec, ctx).await,
    }
}

/// Execute the runtime command
pub async fn runtime(args: RuntimeArgs, spec: &BuildSpec, ctx: &UiContext) -> KilnResult<()> {
    match args.action {
        RuntimeAction::Build(args) => build(Recipe::Runtime, spec, &runtime_options(args), ctx).await,
        RuntimeAction::DeleteCache(args) => delete_cache(Recipe::Runtime, args, spec, ctx).await,
    }
}

/// Execute the module command
pub async fn module(args: ModuleArgs, spec: &BuildSpec, ctx: &UiContext) -> KilnResult<()> {
    match args.action {
        ModuleAction::Build {
            module_version,
            cache_prefix,
        } => {
            let recipe = Recipe::module(spec, args.module, &module_version)?;
            let options = RecipeOptions {
                cache_prefix,
                ..Default::default()
            };
            build(recipe, spec, &options, ctx).await
        }
        ModuleAction::DeleteCache {
            module_version,
            args: cache_args,
        } => {
            let recipe = Recipe::module(spec, args.module, &module_version)?;
            delete_cache(recipe, cache_args, spec, ctx).await
        }
    }
}

fn runtime_options(args: RuntimeBuildArgs) -> RecipeOptions {
    RecipeOptions {
        cache_prefix: args.cache_prefix,
        image_name: args.name,
        image_tag: args.tag,
        squash: !args.no_squash,
        remove_package_manager: args.remove_package_manager,
        modules: args.modules,
    }
}

async fn build(
    recipe: Recipe,
    spec: &BuildSpec,
    options: &RecipeOptions,
    ctx: &UiContext,
) -> KilnResult<()> {
    let store = open_store(Some(spec)).await?;
    let report = recipe.build(&store, spec, options, ctx).await?;
    summarize(ctx, &report);
    Ok(())
}

fn summarize(ctx: &UiContext, report: &RecipeReport) {
    ui::key_value(ctx, "Image", &report.image);
    ui::key_value(
        ctx,
        "Layers",
        &format!("{} cached, {} built", report.cached, report.built),
    );
}
