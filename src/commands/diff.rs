//! `homestack diff` - preview what apply would change

use anyhow::Result;
use declarative::{Resource, ResourceDiff, compute_diffs};

use crate::Context;
use crate::engine::{display_diff, display_object_diff};
use crate::ui;

pub fn run(ctx: &Context, target: Option<&str>) -> Result<()> {
    ui::header("Stack Diff");

    let planned = super::plan(ctx, target)?;
    ui::kv("Backend", &planned.backend);

    let diffs: Vec<ResourceDiff> = compute_diffs(planned.plan.selected_resources());
    display_diff(&diffs);

    if diffs.is_empty() {
        return Ok(());
    }

    ui::section("Object changes");
    for resource in planned.selected() {
        if !diffs.iter().any(|d| d.resource_id == resource.id()) {
            continue;
        }
        let live = resource.live_objects()?;
        for (desired, live) in resource.objects().iter().zip(&live) {
            display_object_diff(live.as_ref(), desired);
        }
    }

    Ok(())
}
