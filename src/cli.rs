// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

/// otto — an agent runtime daemon that drives tool-using AI tasks.
#[derive(Parser, Debug)]
#[command(name = "otto", version, about)]
pub struct Cli {
    /// Path to an explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr even when OTTO_LOG_FILE is not set.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the agent runtime daemon (the default when no subcommand is given).
    Serve {
        /// Project directory new tasks are rooted in.
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },

    /// Print the effective merged configuration and exit.
    ShowConfig,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
