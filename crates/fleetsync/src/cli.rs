//! Clap derive structures for the `fleetsync` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fleetsync -- device-farm console client
#[derive(Debug, Parser)]
#[command(
    name = "fleetsync",
    version,
    about = "List, watch, and register devices on a device-farm console",
    long_about = "Maintains a live replica of a device-farm fleet: a REST snapshot\n\
        for bootstrap, then a change-feed WebSocket for incremental updates.",
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
    /// Console profile to use
    #[arg(long, short = 'p', env = "FLEETSYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Console base URL (overrides profile)
    #[arg(long, short = 'c', env = "FLEETSYNC_CONSOLE", global = true)]
    pub console: Option<String>,

    /// Session token
    #[arg(long, env = "FLEETSYNC_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "FLEETSYNC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "FLEETSYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "FLEETSYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output Enum ──────────────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one udid per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the fleet from a fresh snapshot
    #[command(alias = "dev", alias = "ls")]
    Devices(DevicesArgs),

    /// Follow the change feed and print replica updates as they land
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Register a device to this session
    Register {
        /// Device udid
        udid: String,
    },

    /// Release a device registration
    Deregister {
        /// Device udid
        udid: String,
    },
}

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Only show devices in this state (e.g. "ok", "offline")
    #[arg(long)]
    pub state: Option<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Also print connection state transitions
    #[arg(long)]
    pub connection_events: bool,
}
