//! Command-line surface (spec.md §6, flag grammar is this crate's own —
//! the spec only fixes behavior). `init` is hidden since users must never
//! invoke it directly; it exists purely as the self-reexec target.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "zdocker", about = "A minimal Linux container runtime")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command in a new container.
    Run(RunArgs),

    /// Internal: the in-container bootstrap. Do not invoke directly.
    #[command(hide = true)]
    Init,

    /// Run a command inside a running container. The re-exec this performs
    /// under the hood (see `src/execinto.rs`) is intercepted by a pre-main
    /// hook before it ever reaches this parser, so the literal argv of
    /// that re-exec is irrelevant — only `ENV_PID`/`ENV_CMD` matter.
    Exec {
        container: String,
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// List containers.
    Ps,

    /// Print a container's captured stdout.
    Logs { container: String },

    /// Stop a running container.
    Stop(StopArgs),

    /// Remove a stopped container's state and workspace.
    Rm { container: String },

    /// Commit a container's current filesystem as a new image tarball.
    Commit { container: String, image: String },

    /// Network management.
    Network {
        #[command(subcommand)]
        command: NetworkCommands,
    },
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Allocate a TTY and run interactively, waiting for exit.
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Run in the background; stdout goes to the container log.
    #[arg(short = 'd', long)]
    pub detach: bool,

    #[arg(short = 'n', long)]
    pub name: Option<String>,

    #[arg(short = 'v', long)]
    pub volume: Option<String>,

    #[arg(short = 'm', long)]
    pub memory: Option<String>,

    #[arg(long = "cpushare")]
    pub cpu_share: Option<u64>,

    #[arg(long = "cpuset")]
    pub cpuset: Option<String>,

    #[arg(long = "net")]
    pub net: Option<String>,

    #[arg(short = 'p', long = "port")]
    pub port_mapping: Vec<String>,

    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    pub image: String,

    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct StopArgs {
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64))]
    pub timeout: Option<u64>,

    #[arg(short = 's', long, default_value = "TERM")]
    pub signal: String,

    pub container: String,
}

#[derive(Subcommand, Debug)]
pub enum NetworkCommands {
    Create {
        #[arg(short = 's', long)]
        subnet: Option<String>,
        #[arg(short = 'd', long, default_value = "bridge")]
        driver: String,
        name: String,
    },
    List,
    Remove {
        name: String,
    },
}
