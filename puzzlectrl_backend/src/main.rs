use anyhow::Result;
use clap::Parser;

use puzzlectrl_backend::{execute, init_logging, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.puzzle_config()?;
    init_logging(config.log_level.as_deref());
    log::debug!("loaded layout for '{}'", config.name);
    execute(&cli.command, &config)
}
