use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub(crate) const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nbuild date: ",
    env!("STACKYARD_BUILD_DATE"),
    "\ntarget:     ",
    env!("STACKYARD_BUILD_TARGET"),
    "\nprofile:    ",
    env!("STACKYARD_BUILD_PROFILE"),
    "\nrustc:      ",
    env!("STACKYARD_BUILD_RUSTC"),
);

/// Parse `KEY=VALUE`; the value may be empty and may contain `=`.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err("key must not be empty".to_string());
    }
    Ok((k.to_string(), v.to_string()))
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum ConfigCmd {
    /// Print a stack's environment (all keys, or one)
    Get {
        stack: String,
        key: Option<String>,
        /// Emit machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Upsert KEY=VALUE pairs and regenerate the stack's .env
    Set {
        stack: String,
        #[arg(required = true, value_parser = parse_key_val)]
        pairs: Vec<(String, String)>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Allocate ports and credentials and materialize a new stack from the template
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Owner recorded on the stack
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// List stacks, newest first
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Preflight, pull images and bring the stack up
    Deploy { stack: String },
    /// Restart every service of the stack
    Restart { stack: String },
    /// Stop the stack's containers without removing them
    Pause { stack: String },
    /// Remove containers, volumes, files and records of the stack
    Delete { stack: String },
    /// Show per-service state; optionally wait until everything runs
    Status {
        stack: String,
        /// Poll for up to SECS seconds until all services run
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Read or edit a stack's environment
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
    /// Re-issue the anon and service-role keys from the stack's JWT secret
    RotateKeys { stack: String },
    /// Containers, memory, CPU, volumes and networks of a stack
    Analyze {
        stack: String,
        #[arg(long)]
        json: bool,
    },
    /// Memory used by each container of a stack
    Memory {
        stack: String,
        #[arg(long)]
        json: bool,
    },
    /// Memory of the docker host
    HostMemory {
        #[arg(long)]
        json: bool,
    },
    /// Check docker, compose, template and connectivity
    Doctor,
    /// Clone the shared template if it is not present yet
    TemplateInit,
}

#[derive(Parser, Debug)]
#[command(
    name = "stackyard",
    version,
    long_version = LONG_VERSION,
    about = "Provision, deploy, monitor and tear down isolated Docker Compose stacks from a shared template.",
    after_long_help = "Examples:\n  stackyard create \"Demo\"\n  stackyard deploy demo-1700000000000\n  stackyard status demo-1700000000000 --wait 120\n  stackyard config set demo-1700000000000 SMTP_HOST=mail.internal\n  stackyard analyze demo-1700000000000 --json\n"
)]
pub(crate) struct Cli {
    /// YAML configuration file (also STACKYARD_CONFIG)
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short = 'v', global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}
