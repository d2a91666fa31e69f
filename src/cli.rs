use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "homestack")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declare and provision the MongoDB + Mongo Express home stack", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to homestack.toml in the config directory)
    #[arg(long, global = true, env = "HOMESTACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override a config value (scope.key=value), repeatable
    #[arg(long = "set", value_name = "SCOPE.KEY=VALUE", global = true)]
    pub overrides: Vec<String>,

    /// Cluster backend
    #[arg(long, value_enum, default_value_t = BackendArg::Memory, global = true, env = "HOMESTACK_BACKEND")]
    pub backend: BackendArg,

    /// kubectl context (kubectl backend)
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// kubeconfig file (kubectl backend)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// In-process cluster emulation
    Memory,
    /// A real cluster through kubectl
    Kubectl,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the resolved cluster objects as JSON
    Render(RenderArgs),

    /// Show what apply would change
    Diff(TargetArgs),

    /// Create or update the stack in dependency order
    Apply(ApplyArgs),

    /// Remove the stack, dependents first
    Destroy(DestroyArgs),

    /// Show the last recorded apply or destroy
    Status,

    /// Show the stack outputs of the last apply
    Outputs(OutputsArgs),

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct TargetArgs {
    /// Only resources matching TYPE or TYPE.NAME (e.g. `app.mongodb`)
    #[arg(short, long)]
    pub target: Option<String>,
}

#[derive(Args)]
pub struct RenderArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Print secret values instead of redacting them
    #[arg(long)]
    pub show_secrets: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Show what would be done without changing anything
    #[arg(short, long)]
    pub dry_run: bool,

    /// Number of parallel jobs within a wave
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Re-run the pass this many times while failures remain
    #[arg(short, long, default_value = "0")]
    pub retries: u32,
}

#[derive(Args)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Show what would be removed without changing anything
    #[arg(short, long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct OutputsArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the resolved settings and where they came from
    Show,
}
