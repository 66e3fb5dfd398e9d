//! The `puzzlectrl` command line.

use std::io::{self, BufRead, IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use puzzle_backend::Puzzle;

use crate::config::PuzzleConfig;

#[derive(Parser)]
#[command(name = "puzzlectrl")]
#[command(about = "Runs command scripts against a Puzzle assembled from a TOML layout")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Puzzle layout; an empty Puzzle without one
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script, read from standard input when no file is given
    Run {
        /// Script file
        #[arg(short, long)]
        script: Option<PathBuf>,
    },

    /// Print every Piece with its params and actions
    Tree,

    /// Print the `set:` script restoring the current param values
    Export,
}

impl Cli {
    pub fn puzzle_config(&self) -> anyhow::Result<PuzzleConfig> {
        match &self.config {
            Some(path) => PuzzleConfig::load(path),
            None => PuzzleConfig::from_toml(""),
        }
    }
}

/// Sets up `env_logger`. A level from the layout wins over `RUST_LOG`.
pub fn init_logging(level: Option<&str>) {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    if builder.try_init().is_err() {
        log::debug!("logger already initialised");
    }
}

fn read_script(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read script {}", path.display())),
        None => {
            let mut script = String::new();
            io::stdin()
                .read_to_string(&mut script)
                .context("Cannot read script from standard input")?;
            Ok(script)
        }
    }
}

fn attach_console(puzzle: &Puzzle) {
    puzzle.set_print_handler(|text| println!("{}", text));
    puzzle.set_prompt_handler(|text| {
        println!("{}", text);
        if io::stdin().is_terminal() {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
        }
        Ok(())
    });
    puzzle.set_error_reporter(|err| log::error!("{}", err));
}

/// Builds the Puzzle, runs `command` on it and closes it.
pub fn execute(command: &Commands, config: &PuzzleConfig) -> anyhow::Result<()> {
    let puzzle = config.build()?;
    attach_console(&puzzle);

    let result = match command {
        Commands::Run { script } => read_script(script.as_deref()).and_then(|script| {
            puzzle.run(&script).context("script aborted")?;
            Ok(())
        }),
        Commands::Tree => {
            print!("{}", puzzle.tree());
            Ok(())
        }
        Commands::Export => puzzle
            .export_setup()
            .map(|setup| print!("{}", setup))
            .map_err(Into::into),
    };
    let closed = puzzle.close().context("closing the puzzle failed");
    result?;
    closed
}
