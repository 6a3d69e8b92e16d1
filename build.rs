//! Renders the `blockhost` man pages into the build output directory.
//!
//! One page covers the top-level command and one more is written per
//! subcommand (`blockhost-script.1` and so on), all from the clap
//! definitions the binary parses with.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(command: Command, out_dir: &Path, page: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    Man::new(command).render(&mut buffer)?;
    fs::write(out_dir.join(page), buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR").map(PathBuf::from).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
    })?;

    let command = Cli::command();
    for subcommand in command.get_subcommands() {
        let page = format!("blockhost-{}.1", subcommand.get_name());
        render(subcommand.clone(), &out_dir, &page)?;
    }
    render(command, &out_dir, "blockhost.1")
}
