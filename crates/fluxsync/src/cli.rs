//! Clap derive structures for the `fluxsync` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fluxsync -- watch channels on a streaming server
#[derive(Debug, Parser)]
#[command(
    name = "fluxsync",
    version,
    about = "Watch channels and control state on a fluxsync streaming server",
    long_about = "Subscribes to channels over one shared streaming connection and\n\
        prints every decoded sample as it arrives.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "FLUXSYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Streaming endpoint URL (overrides profile)
    #[arg(long, short = 's', env = "FLUXSYNC_SERVER", global = true)]
    pub server: Option<String>,

    /// Username for basic authentication (overrides profile)
    #[arg(long, short = 'u', global = true)]
    pub username: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "FLUXSYNC_OUTPUT",
        default_value = "plain",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `channel value`, one sample per line
    Plain,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print every sample written to the given channels
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Print control-state transfers as they arrive
    #[command(alias = "ctl")]
    Control(ControlArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Channels to subscribe to
    #[arg(required = true, num_args = 1..)]
    pub channels: Vec<String>,

    /// Exit after this many samples
    #[arg(long, short = 'n')]
    pub count: Option<u64>,
}

// ── Control ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ControlArgs {
    /// Print the tracked control state after the first update and exit
    #[arg(long)]
    pub once: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display the resolved profile (passwords redacted)
    Show,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
