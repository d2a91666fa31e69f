//! Execution UI - progress, confirmation and summaries around the engine

use anyhow::Result;
use colored::Colorize;
use declarative::{ApplyResult, ConfirmCallback, ExecuteSummary, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::retry::RetryCallback;
use crate::ui;

/// Spinner per wave, one line per finished resource
pub struct SpinnerProgress {
    spinner: Option<ProgressBar>,
    waves: usize,
    quiet: bool,
}

impl SpinnerProgress {
    pub fn new(waves: usize, quiet: bool) -> Self {
        Self {
            spinner: None,
            waves,
            quiet,
        }
    }

    fn line(&self, text: &str) {
        match &self.spinner {
            Some(spinner) => spinner.println(text),
            None => println!("{text}"),
        }
    }
}

impl ProgressCallback for SpinnerProgress {
    fn on_wave_start(&mut self, index: usize, count: usize) {
        if self.quiet {
            return;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(format!(
            "Wave {}/{}: {count} resource(s)",
            index + 1,
            self.waves.max(index + 1)
        ));
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    fn on_resource_start(&mut self, _id: &str, description: &str) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(description.to_string());
        }
    }

    fn on_resource_complete(&mut self, id: &str, result: &ApplyResult) {
        if self.quiet {
            return;
        }
        let symbol = match result {
            ApplyResult::NoChange => "○".dimmed(),
            ApplyResult::Created | ApplyResult::Modified | ApplyResult::Removed => "✓".green(),
            ApplyResult::Failed { .. } => "✗".red(),
            ApplyResult::Skipped { .. } => "⊘".yellow(),
        };
        self.line(&format!("    {symbol} {id} {}", format!("({result})").dimmed()));
    }

    fn on_wave_complete(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

/// Asks once through a terminal prompt, then remembers the answer
pub struct PromptConfirm {
    assume_yes: bool,
}

impl PromptConfirm {
    /// `assume_yes` skips the prompt entirely (`--yes`)
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }

        println!();
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()?;
        self.assume_yes = confirmed;
        Ok(confirmed)
    }
}

/// Reports retries as warnings
pub struct UiRetry;

impl RetryCallback for UiRetry {
    fn on_retry(&self, attempt: u32, max_attempts: u32, reason: &str, delay: Duration) {
        ui::warn(&format!(
            "Attempt {attempt}/{max_attempts} failed: {reason}. Retrying in {}s...",
            delay.as_secs()
        ));
    }
}

/// Print the final summary of a pass
pub fn print_summary(summary: &ExecuteSummary, verb: &str) {
    println!();
    if summary.is_success() {
        ui::success(&format!("Stack {verb} successfully"));
    } else {
        println!("  {} Stack {verb} with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} resources updated", summary.modified);
    }
    if summary.removed > 0 {
        println!("    • {} resources removed", summary.removed);
    }
    if summary.no_change > 0 {
        println!("    • {} resources unchanged", summary.no_change);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
        for outcome in &summary.outcomes {
            if let ApplyResult::Failed { error } = &outcome.result {
                println!("      {} {}: {}", "✗".red(), outcome.resource_id, error);
                if let Some(advice) = outcome.hint.as_ref().and_then(|h| h.advice.as_deref()) {
                    println!("        {}", advice.dimmed());
                }
            }
        }
    }
}
