//! Command-line interface definitions for the `blockhost` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `blockhost` binary.
#[derive(Debug, Parser)]
#[command(
    name = "blockhost",
    about = "Declare and preview a single-node game-server stack",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Print the bootstrap script rendered for a bucket.
    #[command(name = "script", about = "Print the bootstrap script rendered for a bucket")]
    Script(ScriptCommand),
    /// Print the declared resource graph wave by wave.
    #[command(name = "graph", about = "Print the declared resource graph wave by wave")]
    Graph(GraphCommand),
    /// Apply the stack with the dry-run engine and print its outputs.
    #[command(
        name = "preview",
        about = "Apply the stack with the dry-run engine and print its outputs"
    )]
    Preview(PreviewCommand),
}

/// Arguments for the `blockhost script` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ScriptCommand {
    /// Storage bucket name exported to the bootstrap environment.
    #[arg(long, value_name = "NAME")]
    pub(crate) bucket: String,
}

/// Arguments for the `blockhost graph` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct GraphCommand {
    /// Emit the graph as JSON instead of one line per wave.
    #[arg(long)]
    pub(crate) json: bool,
}

/// Arguments for the `blockhost preview` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct PreviewCommand {
    /// Applied-state file from a previous preview. When given, plan actions
    /// are computed against it and the new state is written back.
    #[arg(long, value_name = "PATH")]
    pub(crate) state: Option<String>,
}
