//! Binary entry point for the blockhost CLI.

use std::fs;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use serde_json::json;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use blockhost::{
    AppliedState, BootstrapSynthesizer, ConfigError, DryRunEngine, DryRunError, FileTree,
    FileTreeError, ProvisionError, Provisioner, Stack, StackConfig, StackError,
    collect_file_tree, digest,
};

mod cli;

use cli::{Cli, GraphCommand, PreviewCommand, ScriptCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("payload error: {0}")]
    Payload(#[from] FileTreeError),
    #[error("stack definition failed: {0}")]
    Stack(#[from] StackError),
    #[error("preview failed: {0}")]
    Provision(#[from] ProvisionError<DryRunError>),
    #[error("state file {path}: {message}")]
    State { path: String, message: String },
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = StackConfig::load_without_cli_args()?;
    let mut stdout = io::stdout().lock();
    match cli {
        Cli::Script(command) => script_command(&config, &command, &mut stdout),
        Cli::Graph(command) => graph_command(&config, &command, &mut stdout),
        Cli::Preview(command) => preview_command(&config, &command, &mut stdout).await,
    }
}

fn payload(config: &StackConfig) -> Result<FileTree, CliError> {
    Ok(collect_file_tree(
        &config.root_path(),
        &config.source_path(),
    )?)
}

fn script_command(
    config: &StackConfig,
    command: &ScriptCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    config.validate_bootstrap()?;
    let files = payload(config)?;
    let script =
        BootstrapSynthesizer::new(config.bootstrap_options()).synthesize(&command.bucket, &files);
    out.write_all(script.as_str().as_bytes())?;
    Ok(())
}

fn graph_command(
    config: &StackConfig,
    command: &GraphCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let stack = Stack::define(config, &payload(config)?)?;
    let graph = stack.graph();
    let waves = graph.waves();

    if command.json {
        let rendered: Vec<Vec<serde_json::Value>> = waves
            .iter()
            .map(|wave| {
                wave.iter()
                    .map(|name| {
                        json!({
                            "name": name,
                            "kind": graph.descriptor(name).map(|descriptor| descriptor.kind()),
                            "depends_on": graph.dependencies_of(name),
                        })
                    })
                    .collect()
            })
            .collect();
        writeln!(out, "{}", json!(rendered))?;
        return Ok(());
    }

    for (index, wave) in waves.iter().enumerate() {
        let names: Vec<&str> = wave.iter().map(|name| name.as_str()).collect();
        writeln!(out, "wave {index}: {}", names.join(", "))?;
    }
    Ok(())
}

async fn preview_command(
    config: &StackConfig,
    command: &PreviewCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let stack = Stack::define(config, &payload(config)?)?;
    let prior = match &command.state {
        Some(path) => read_state(path)?,
        None => AppliedState::new(),
    };

    let report = Provisioner::new(DryRunEngine::new())
        .with_prior_state(prior)
        .apply(&stack)
        .await?;

    for applied in &report.actions {
        writeln!(out, "plan.{}={}", applied.resource, applied.action)?;
    }
    for (key, value) in report.outputs.entries() {
        if key == "userData" {
            writeln!(out, "{key}=sha256:{}", digest(value))?;
        } else {
            writeln!(out, "{key}={value}")?;
        }
    }

    if let Some(path) = &command.state {
        write_state(path, &report.state)?;
    }
    Ok(())
}

fn read_state(path: &str) -> Result<AppliedState, CliError> {
    let state_error = |message: String| CliError::State {
        path: path.to_owned(),
        message,
    };
    match fs::read_to_string(path) {
        Ok(contents) => {
            AppliedState::from_json(&contents).map_err(|err| state_error(err.to_string()))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(AppliedState::new()),
        Err(err) => Err(state_error(err.to_string())),
    }
}

fn write_state(path: &str, state: &AppliedState) -> Result<(), CliError> {
    let state_error = |message: String| CliError::State {
        path: path.to_owned(),
        message,
    };
    let contents = state.to_json().map_err(|err| state_error(err.to_string()))?;
    fs::write(path, contents).map_err(|err| state_error(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
