use anyhow::Result;

use crate::Context;
use crate::cli::ConfigCommand;
use crate::config::CONFIG_FILES;
use crate::paths;
use crate::settings::SCOPE;
use crate::ui;

pub fn run(ctx: &Context, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx),
    }
}

fn show(ctx: &Context) -> Result<()> {
    ui::header("Configuration");

    let (config, settings) = super::resolve_settings(ctx)?;

    ui::kv("Config directory", &paths::config_dir()?.display().to_string());
    ui::kv("State directory", &paths::state_dir()?.display().to_string());
    match config.path() {
        Some(path) => ui::kv("Config file", &path.display().to_string()),
        None => ui::kv(
            "Config file",
            &format!("not found ({}), using defaults", CONFIG_FILES.join(" or ")),
        ),
    }
    if !ctx.overrides.is_empty() {
        ui::kv("Overrides", &ctx.overrides.join(", "));
    }

    ui::section(&format!("[{SCOPE}]"));
    let rows = settings.rows();
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in rows {
        ui::kv_aligned(label, value, width);
    }

    println!();
    ui::dim("Config keys come from the file and --set; credentials and images from the environment.");

    Ok(())
}
