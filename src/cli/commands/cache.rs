//! Cache commands - delete cached layers by namespace

use super::open_store;
use crate::cache::prune::{delete_entries, matching_entries};
use crate::cache::PruneReport;
use crate::cli::args::{DeleteCacheArgs, PruneArgs};
use crate::config::BuildSpec;
use crate::error::KilnResult;
use crate::orchestration::ImageStore;
use crate::recipes::Recipe;
use crate::ui::{self, UiContext};
use console::style;

/// Execute `<recipe> delete-cache`
pub async fn delete_cache(
    recipe: Recipe,
    args: DeleteCacheArgs,
    spec: &BuildSpec,
    ctx: &UiContext,
) -> KilnResult<()> {
    let namespace = recipe.namespace(spec, args.cache_prefix.as_deref());
    let store = open_store(Some(spec)).await?;
    let ctx = ctx.clone().with_auto_yes(args.yes);
    clear_namespace(&store, &namespace, &ctx).await.map(|_| ())
}

/// Execute the prune command
pub async fn prune(args: PruneArgs, spec: Option<&BuildSpec>, ctx: &UiContext) -> KilnResult<()> {
    let store = open_store(spec).await?;
    let ctx = ctx.clone().with_auto_yes(args.yes);
    clear_namespace(&store, &args.prefix, &ctx).await.map(|_| ())
}

/// List, confirm and delete every cache entry under `namespace`.
///
/// Returns `None` when there was nothing to delete or the user declined.
async fn clear_namespace(
    store: &dyn ImageStore,
    namespace: &str,
    ctx: &UiContext,
) -> KilnResult<Option<PruneReport>> {
    let tags = matching_entries(store, namespace).await?;

    if tags.is_empty() {
        ui::step_info(ctx, &format!("No cache layers found for '{}'", namespace));
        return Ok(None);
    }

    println!("This will remove {} cache layer(s):", tags.len());
    for tag in &tags {
        println!("  {} {}", style("•").red(), tag);
    }
    println!();

    if !ui::confirm(ctx, "Delete these images?", false).await? {
        ui::step_warn(ctx, "Aborted.");
        return Ok(None);
    }

    let report = delete_entries(store, &tags).await;
    for (tag, reason) in &report.failed {
        ui::step_warn(ctx, &format!("Could not remove {}: {}", tag, reason));
    }
    ui::step_ok(
        ctx,
        &format!("Removed {} of {} cache layer(s)", report.deleted.len(), tags.len()),
    );

    Ok(Some(report))
}
