//! Diff display - homestack-specific UI

use colored::Colorize;
use declarative::{DiffSummary, ResourceDiff, ResourceState, group_by_type};
use kubekit::ApiObject;
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

use crate::settings::REDACTED;

/// Display a list of diffs grouped by resource type
pub fn display_diff(diffs: &[ResourceDiff]) {
    if diffs.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Stack Diff".bold()
    );
    println!("│");

    for (resource_type, type_diffs) in &group_by_type(diffs) {
        println!("│ {}", type_title(resource_type).bold());

        for diff in type_diffs {
            let symbol = if diff.is_addition() {
                "+".green()
            } else if diff.is_removal() {
                "-".red()
            } else {
                "~".yellow()
            };
            println!(
                "│   {} {:<40} {}",
                symbol,
                diff.resource_id,
                state_desc(&diff.current, &diff.desired).dimmed()
            );
        }
        println!("│");
    }

    let summary = DiffSummary::from_diffs(diffs);
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} to create, {} to update, {} to remove)",
        summary.total().to_string().bold(),
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.removals.to_string().red()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

fn type_title(resource_type: &str) -> &str {
    match resource_type {
        "namespace" => "Namespaces",
        "secret" => "Secrets",
        "volume_claim" => "Volume claims",
        "app" => "Apps (Deployment + Service)",
        other => other,
    }
}

fn state_desc(current: &ResourceState, desired: &ResourceState) -> String {
    match (current, desired) {
        (_, ResourceState::Absent) => "(will remove)".to_string(),
        (ResourceState::Absent, ResourceState::Present { details }) => format!(
            "(absent){}",
            details
                .as_ref()
                .map(|d| format!(" → {d}"))
                .unwrap_or_default()
        ),
        (ResourceState::Modified { from, to }, _) => format!("{from} → {to}"),
        _ => String::new(),
    }
}

/// Copy of an object without secret values or platform-assigned fields
pub fn display_form(object: &ApiObject) -> ApiObject {
    let mut shown = object.clone();
    shown.metadata.uid = None;
    shown.metadata.resource_version = None;
    shown.body.remove("status");
    for key in ["stringData", "data"] {
        if let Some(Value::Object(entries)) = shown.body.get_mut(key) {
            for value in entries.values_mut() {
                *value = Value::String(REDACTED.to_string());
            }
        }
    }
    shown
}

/// Line changes between two texts; unchanged lines are omitted
pub fn changed_lines(old: &str, new: &str) -> Vec<(ChangeTag, String)> {
    TextDiff::from_lines(old, new)
        .iter_all_changes()
        .filter(|change| change.tag() != ChangeTag::Equal)
        .map(|change| (change.tag(), change.value().trim_end().to_string()))
        .collect()
}

/// Print a line diff of a live object against its desired form
pub fn display_object_diff(live: Option<&ApiObject>, desired: &ApiObject) {
    let render = |object: &ApiObject| {
        serde_json::to_string_pretty(&display_form(object)).unwrap_or_default() + "\n"
    };
    let old = live.map(render).unwrap_or_default();
    let new = render(desired);

    println!("    {}", desired.object_ref().to_string().bold());
    let lines = changed_lines(&old, &new);
    if lines.is_empty() {
        println!("      {}", "(no field changes)".dimmed());
    }
    for (tag, line) in lines {
        match tag {
            ChangeTag::Delete => println!("      {}", format!("- {line}").red()),
            ChangeTag::Insert => println!("      {}", format!("+ {line}").green()),
            ChangeTag::Equal => {}
        }
    }
}
