mod cli;
mod commands;
mod config;
mod engine;
mod paths;
mod resource;
mod retry;
mod settings;
mod stack;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{BackendArg, Cli, Command};
use kubekit::BackendKind;
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Explicit config file
    pub config: Option<PathBuf>,
    /// `scope.key=value` overrides
    pub overrides: Vec<String>,
    pub backend: BackendKind,
    /// kubectl context
    pub kube_context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        overrides: cli.overrides,
        backend: match cli.backend {
            BackendArg::Memory => BackendKind::Memory,
            BackendArg::Kubectl => BackendKind::Kubectl,
        },
        kube_context: cli.context,
        kubeconfig: cli.kubeconfig,
    };
    log::debug!("Using {} backend", ctx.backend.label());

    match cli.command {
        Command::Render(args) => {
            commands::render::run(&ctx, args.target.target.as_deref(), args.show_secrets)
        }
        Command::Diff(args) => commands::diff::run(&ctx, args.target.as_deref()),
        Command::Apply(args) => commands::apply::run(
            &ctx,
            &commands::apply::ApplyOptions {
                target: args.target.target,
                dry_run: args.dry_run,
                jobs: args.jobs,
                yes: args.yes,
                retries: args.retries,
            },
        ),
        Command::Destroy(args) => commands::apply::destroy(
            &ctx,
            args.target.target.as_deref(),
            args.dry_run,
            args.yes,
        ),
        Command::Status => commands::status::run(&ctx),
        Command::Outputs(args) => commands::status::outputs(&ctx, args.json),
        Command::Config(cmd) => commands::config::run(&ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "homestack", &mut io::stdout());
            Ok(())
        }
    }
}
