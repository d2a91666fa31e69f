//! `homestack apply` and `homestack destroy`

use anyhow::Result;
use declarative::{
    ConfirmCallback, ExecuteOptions, ExecuteSummary, ResourceDiff, ResourceState, compute_diffs,
};
use std::collections::BTreeMap;

use crate::Context;
use crate::engine::{PromptConfirm, SpinnerProgress, UiRetry, display_diff, print_summary};
use crate::retry::{RetryConfig, with_retry};
use crate::state::{Operation, StackState};
use crate::ui;

/// Options for `apply`
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub target: Option<String>,
    pub dry_run: bool,
    pub jobs: usize,
    pub yes: bool,
    pub retries: u32,
}

pub fn run(ctx: &Context, opts: &ApplyOptions) -> Result<()> {
    ui::header("Applying Stack");

    if opts.dry_run {
        ui::warn("Dry run - no changes will be made");
    }

    let planned = super::plan(ctx, opts.target.as_deref())?;
    ui::kv("Backend", &planned.backend);

    let diffs = compute_diffs(planned.plan.selected_resources());
    display_diff(&diffs);

    let mut confirm = PromptConfirm::new(opts.yes);
    if !diffs.is_empty() && !opts.dry_run && !confirm.confirm("Apply changes?")? {
        println!();
        ui::error("Aborted");
        return Ok(());
    }

    let exec_opts = ExecuteOptions {
        dry_run: opts.dry_run,
        jobs: opts.jobs.max(1),
        verbose: ctx.verbose > 0,
    };
    let mut progress = SpinnerProgress::new(planned.plan.waves().len(), ctx.quiet);

    let summary = with_retry(
        &RetryConfig::with_retries(opts.retries),
        &UiRetry,
        || declarative::execute(&planned.plan, &exec_opts, &mut progress, &mut confirm),
        |summary: &ExecuteSummary| summary.retryable_failure().map(|e| e.to_string()),
    )?;

    print_summary(&summary, if opts.dry_run { "planned" } else { "applied" });

    if opts.dry_run {
        print_outputs(&planned.outputs.declared());
        return Ok(());
    }
    if summary.is_success() && summary.total_changes() == 0 {
        ui::dim("Everything already matches the declared stack");
    }

    let outputs = planned.outputs.resolve(&summary);
    print_outputs(&outputs);

    let state = StackState::from_summary(Operation::Apply, &planned.backend, &summary, outputs);
    record(&state);

    match summary.first_failure() {
        Some(failure) => Err(failure.into()),
        None => Ok(()),
    }
}

pub fn destroy(ctx: &Context, target: Option<&str>, dry_run: bool, yes: bool) -> Result<()> {
    ui::header("Destroying Stack");

    if dry_run {
        ui::warn("Dry run - no changes will be made");
    }

    let planned = super::plan(ctx, target)?;
    ui::kv("Backend", &planned.backend);

    let mut removals = Vec::new();
    for resource in planned.plan.selected_resources() {
        let current = resource.current_state()?;
        if current.is_absent() {
            continue;
        }
        removals.push(ResourceDiff {
            resource_id: resource.id(),
            resource_type: resource.resource_type().to_string(),
            description: resource.description(),
            current,
            desired: ResourceState::Absent,
        });
    }
    display_diff(&removals);

    if removals.is_empty() {
        return Ok(());
    }

    let mut confirm = PromptConfirm::new(yes);
    if !dry_run && !confirm.confirm(&format!("Destroy {} resources?", removals.len()))? {
        println!();
        ui::error("Aborted");
        return Ok(());
    }

    let exec_opts = ExecuteOptions {
        dry_run,
        jobs: 1,
        verbose: ctx.verbose > 0,
    };
    let mut progress = SpinnerProgress::new(planned.plan.waves().len(), ctx.quiet);
    let summary = declarative::destroy(&planned.plan, &exec_opts, &mut progress, &mut confirm)?;

    print_summary(&summary, if dry_run { "planned" } else { "destroyed" });

    if dry_run {
        return Ok(());
    }

    let state =
        StackState::from_summary(Operation::Destroy, &planned.backend, &summary, BTreeMap::new());
    record(&state);

    match summary.first_failure() {
        Some(failure) => Err(failure.into()),
        None => Ok(()),
    }
}

fn print_outputs(outputs: &BTreeMap<String, String>) {
    if outputs.is_empty() {
        return;
    }
    ui::section("Outputs");
    for (key, value) in outputs {
        ui::kv(key, value);
    }
}

/// Failing to record state does not fail the run
fn record(state: &StackState) {
    match state.save() {
        Ok(path) => ui::dim(&format!("State recorded at {}", path.display())),
        Err(e) => ui::warn(&format!("Could not record state: {e:#}")),
    }
}
