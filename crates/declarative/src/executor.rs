//! Execution engine - applies compiled plans wave by wave
//!
//! Within a wave every resource only depends on earlier waves, so the wave is
//! fanned out over a rayon pool. A resource runs only once all of its
//! dependencies reached `Ready`; anything downstream of a failure stays
//! `Pending` and is reported as skipped. Nothing already applied is rolled back.

use crate::context::{ApplyContext, ConfirmCallback, ProgressCallback};
use crate::diff::{ResourceDiff, compute_diffs};
use crate::planner::ExecutionPlan;
use crate::resource::Resource;
use crate::types::{
    ApplyResult, ExecuteOptions, ExecuteSummary, FailureHint, Outputs, ResourceOutcome,
    ResourceState, ResourceStatus, StatusTracker,
};
use anyhow::Result;
use rayon::prelude::*;
use std::collections::HashSet;

/// Outcome of driving one resource through its lifecycle
struct Provisioned {
    status: ResourceStatus,
    result: ApplyResult,
    outputs: Outputs,
    hint: Option<FailureHint>,
}

/// Apply a plan with the given options and callbacks
///
/// # Arguments
/// * `plan` - The compiled plan to run
/// * `opts` - Execution options (dry_run, jobs, verbose)
/// * `progress` - Progress callback
/// * `confirm` - Confirmation callback, asked once before any change
///
/// # Returns
/// Summary of execution results, including per-resource outcomes
pub fn execute<P, C>(
    plan: &ExecutionPlan,
    opts: &ExecuteOptions,
    progress: &mut P,
    confirm: &mut C,
) -> Result<ExecuteSummary>
where
    P: ProgressCallback,
    C: ConfirmCallback,
{
    let diffs = compute_diffs(plan.selected_resources());

    // Confirm before proceeding (unless dry_run)
    if !diffs.is_empty() && !opts.dry_run && !confirm.confirm("Apply changes?")? {
        return Ok(skipped_summary(&diffs, "not confirmed"));
    }

    if opts.dry_run {
        return Ok(skipped_summary(&diffs, "dry run"));
    }

    let tracker = StatusTracker::new();
    for entry in plan.entries().iter().filter(|e| e.selected) {
        tracker.declare(&entry.resource.id());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create thread pool: {}", e))?;

    let mut ready: HashSet<usize> = HashSet::new();
    let mut summary = ExecuteSummary::default();

    for (wave_index, wave) in plan.waves().iter().enumerate() {
        let mut runnable = Vec::with_capacity(wave.len());

        for &position in wave {
            let entry = plan.entry(position);
            if !entry.selected {
                if prerequisite_in_place(entry.resource.as_ref()) {
                    ready.insert(position);
                }
                continue;
            }

            let id = entry.resource.id();
            tracker.transition(&id, ResourceStatus::Pending)?;

            match entry.depends_on.iter().find(|d| !ready.contains(*d)) {
                Some(&blocker) => {
                    let dependency = plan.entry(blocker);
                    let reason = if dependency.selected {
                        format!("blocked by failed dependency {}", dependency.resource.id())
                    } else {
                        format!("dependency {} is not in place", dependency.resource.id())
                    };
                    log::info!("{id} stays pending: {reason}");
                    summary.add_outcome(ResourceOutcome {
                        resource_id: id,
                        resource_type: entry.resource.resource_type().to_string(),
                        status: ResourceStatus::Pending,
                        result: ApplyResult::Skipped { reason },
                        outputs: Outputs::new(),
                        hint: None,
                    });
                }
                None => runnable.push(position),
            }
        }

        if runnable.is_empty() {
            continue;
        }

        progress.on_wave_start(wave_index, runnable.len());

        let (parallel, sequential): (Vec<usize>, Vec<usize>) = runnable
            .iter()
            .copied()
            .partition(|&p| plan.entry(p).resource.can_parallelize());

        let mut results: Vec<(usize, Provisioned)> = Vec::with_capacity(runnable.len());

        if !parallel.is_empty() {
            // The progress callback is not thread-safe: report starts up front,
            // completions after the batch joins
            for &p in &parallel {
                let resource = plan.entry(p).resource.as_ref();
                progress.on_resource_start(&resource.id(), &resource.description());
            }

            let batch: Vec<crate::error::Result<(usize, Provisioned)>> = pool.install(|| {
                parallel
                    .par_iter()
                    .map(|&p| {
                        provision(plan.entry(p).resource.as_ref(), &tracker, opts.verbose)
                            .map(|done| (p, done))
                    })
                    .collect()
            });
            for item in batch {
                results.push(item?);
            }
        }

        for &p in &sequential {
            let resource = plan.entry(p).resource.as_ref();
            progress.on_resource_start(&resource.id(), &resource.description());
            results.push((p, provision(resource, &tracker, opts.verbose)?));
        }

        for (position, done) in results {
            let resource = plan.entry(position).resource.as_ref();
            progress.on_resource_complete(&resource.id(), &done.result);
            if done.status.is_ready() {
                ready.insert(position);
            }
            summary.add_outcome(ResourceOutcome {
                resource_id: resource.id(),
                resource_type: resource.resource_type().to_string(),
                status: done.status,
                result: done.result,
                outputs: done.outputs,
                hint: done.hint,
            });
        }

        progress.on_wave_complete();
    }

    summary.transitions = tracker.transitions();
    Ok(summary)
}

/// Remove a plan's resources, dependents before their dependencies
///
/// A resource is only removed once nothing that depends on it is left. A
/// failed or skipped removal keeps every dependency of that resource in place.
pub fn destroy<P, C>(
    plan: &ExecutionPlan,
    opts: &ExecuteOptions,
    progress: &mut P,
    confirm: &mut C,
) -> Result<ExecuteSummary>
where
    P: ProgressCallback,
    C: ConfirmCallback,
{
    let present: Vec<ResourceDiff> = plan
        .selected_resources()
        .filter(|r| !is_absent(*r))
        .map(|r| ResourceDiff {
            resource_id: r.id(),
            resource_type: r.resource_type().to_string(),
            description: r.description(),
            current: ResourceState::Present { details: None },
            desired: ResourceState::Absent,
        })
        .collect();

    if present.is_empty() {
        return Ok(ExecuteSummary::default());
    }

    if !opts.dry_run
        && !confirm.confirm(&format!("Destroy {} resources?", present.len()))?
    {
        return Ok(skipped_summary(&present, "not confirmed"));
    }

    if opts.dry_run {
        return Ok(skipped_summary(&present, "dry run"));
    }

    let mut ctx = ApplyContext::new(false, opts.verbose);
    let mut retained: HashSet<usize> = HashSet::new();
    let mut summary = ExecuteSummary::default();

    for (wave_index, wave) in plan.waves().iter().enumerate().rev() {
        let selected = wave.iter().filter(|&&p| plan.entry(p).selected).count();
        if selected > 0 {
            progress.on_wave_start(wave_index, selected);
        }

        for &position in wave.iter().rev() {
            let entry = plan.entry(position);
            let resource = entry.resource.as_ref();

            if !entry.selected {
                if !is_absent(resource) {
                    retained.insert(position);
                }
                continue;
            }

            let id = resource.id();
            progress.on_resource_start(&id, &resource.description());

            let holder = plan
                .dependents(position)
                .into_iter()
                .find(|d| retained.contains(d));

            let (result, hint) = match holder {
                Some(holder) => (
                    ApplyResult::Skipped {
                        reason: format!(
                            "dependent {} is still present",
                            plan.entry(holder).resource.id()
                        ),
                    },
                    None,
                ),
                None => match resource.remove(&mut ctx) {
                    Ok(result) => (result, None),
                    Err(e) => (
                        ApplyResult::Failed {
                            error: format!("{e:#}"),
                        },
                        Some(resource.failure_hint(&e)),
                    ),
                },
            };

            let status = match &result {
                ApplyResult::Removed | ApplyResult::NoChange => ResourceStatus::Declared,
                ApplyResult::Failed { error } => ResourceStatus::Failed {
                    error: error.clone(),
                },
                _ => ResourceStatus::Ready,
            };
            if !matches!(status, ResourceStatus::Declared) {
                retained.insert(position);
            }

            progress.on_resource_complete(&id, &result);
            summary.add_outcome(ResourceOutcome {
                resource_id: id,
                resource_type: resource.resource_type().to_string(),
                status,
                result,
                outputs: Outputs::new(),
                hint,
            });
        }

        if selected > 0 {
            progress.on_wave_complete();
        }
    }

    Ok(summary)
}

/// Drive a single resource from `Pending` to a terminal state
fn provision(
    resource: &dyn Resource,
    tracker: &StatusTracker,
    verbose: bool,
) -> crate::error::Result<Provisioned> {
    let id = resource.id();
    let mut ctx = ApplyContext::new(false, verbose);

    let needs_apply = match resource.needs_apply() {
        Ok(needs) => needs,
        Err(e) => {
            let hint = resource.failure_hint(&e);
            return fail(tracker, &id, format!("state detection failed: {e:#}"), hint);
        }
    };

    let result = if needs_apply {
        tracker.transition(&id, ResourceStatus::Applying)?;
        log::debug!("Applying {id}");
        match resource.apply(&mut ctx) {
            Ok(ApplyResult::Failed { error }) => {
                return fail(tracker, &id, error, FailureHint::default());
            }
            Ok(result) => result,
            Err(e) => {
                let hint = resource.failure_hint(&e);
                return fail(tracker, &id, format!("{e:#}"), hint);
            }
        }
    } else {
        log::debug!("{id} already converged");
        ApplyResult::NoChange
    };

    if let Err(e) = resource.wait_ready(&ctx) {
        let hint = resource.failure_hint(&e);
        return fail(tracker, &id, format!("not ready: {e:#}"), hint);
    }
    tracker.transition(&id, ResourceStatus::Ready)?;

    let outputs = resource.outputs().unwrap_or_else(|e| {
        log::warn!("Could not read outputs of {id}: {e:#}");
        Outputs::new()
    });

    Ok(Provisioned {
        status: ResourceStatus::Ready,
        result,
        outputs,
        hint: None,
    })
}

fn fail(
    tracker: &StatusTracker,
    id: &str,
    error: String,
    hint: FailureHint,
) -> crate::error::Result<Provisioned> {
    log::warn!("{id} failed: {error}");
    let status = ResourceStatus::Failed {
        error: error.clone(),
    };
    tracker.transition(id, status.clone())?;
    Ok(Provisioned {
        status,
        result: ApplyResult::Failed { error },
        outputs: Outputs::new(),
        hint: Some(hint),
    })
}

/// A filtered-out prerequisite counts as ready when it already exists
fn prerequisite_in_place(resource: &dyn Resource) -> bool {
    matches!(
        resource.current_state(),
        Ok(ResourceState::Present { .. } | ResourceState::Modified { .. })
    )
}

fn is_absent(resource: &dyn Resource) -> bool {
    matches!(resource.current_state(), Ok(ResourceState::Absent))
}

fn skipped_summary(diffs: &[ResourceDiff], reason: &str) -> ExecuteSummary {
    let mut summary = ExecuteSummary::default();
    for diff in diffs {
        summary.add_outcome(ResourceOutcome {
            resource_id: diff.resource_id.clone(),
            resource_type: diff.resource_type.clone(),
            status: ResourceStatus::Declared,
            result: ApplyResult::Skipped {
                reason: reason.to_string(),
            },
            outputs: Outputs::new(),
            hint: None,
        });
    }
    summary
}

/// Simple execution without callbacks
///
/// For basic use cases where you don't need progress or confirmation.
pub fn execute_simple(plan: &ExecutionPlan, opts: &ExecuteOptions) -> Result<ExecuteSummary> {
    use crate::context::{AutoConfirm, NoProgress};

    execute(plan, opts, &mut NoProgress, &mut AutoConfirm)
}
