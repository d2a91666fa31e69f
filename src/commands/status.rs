//! `homestack status` and `homestack outputs` - the last recorded run

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;

use crate::Context;
use crate::state::{Operation, StackState};
use crate::ui;

pub fn run(_ctx: &Context) -> Result<()> {
    ui::header("Stack Status");

    let Some(state) = StackState::load()? else {
        ui::info("Nothing recorded yet. Run 'homestack apply' first.");
        return Ok(());
    };

    let operation = match state.operation {
        Operation::Apply => "apply",
        Operation::Destroy => "destroy",
    };
    ui::kv("Last run", operation);
    ui::kv("Backend", &state.backend);
    ui::kv(
        "Finished",
        &state
            .finished_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
    );

    ui::section("Resources");
    let width = state.resources.keys().map(String::len).max().unwrap_or(0);
    for (id, record) in &state.resources {
        let status = match record.status.as_str() {
            "ready" => record.status.green(),
            "failed" => record.status.red(),
            _ => record.status.yellow(),
        };
        println!(
            "  {:<width$}  {:<8}  {}",
            id,
            status,
            record.result.dimmed()
        );
        for (key, value) in &record.outputs {
            ui::dim(&format!("    {key} = {value}"));
        }
    }

    if !state.outputs.is_empty() {
        ui::section("Outputs");
        let width = state.outputs.keys().map(String::len).max().unwrap_or(0);
        for (key, value) in &state.outputs {
            ui::kv_aligned(key, value, width);
        }
    }

    if state.has_failures() {
        println!();
        ui::warn("The last run had failures");
    }

    Ok(())
}

pub fn outputs(_ctx: &Context, json: bool) -> Result<()> {
    let outputs = StackState::load()?
        .filter(|state| state.operation == Operation::Apply)
        .map(|state| state.outputs)
        .unwrap_or_default();

    if json {
        let rendered =
            serde_json::to_string_pretty(&outputs).context("Failed to serialize outputs")?;
        println!("{rendered}");
        return Ok(());
    }

    if outputs.is_empty() {
        ui::info("No outputs recorded. Run 'homestack apply' first.");
        return Ok(());
    }

    for (key, value) in &outputs {
        println!("{key} = {value}");
    }
    Ok(())
}
