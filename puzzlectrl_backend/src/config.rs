//! Puzzle layouts read from TOML.
//!
//! ```toml
//! name = "Bench"
//! debug = true
//! log_level = "debug"
//! setup = "set:rng:seed:7"
//!
//! [[pieces]]
//! name = "rng"
//! kind = "random_number"
//!
//! [[pieces]]
//! name = "scan"
//! kind = "scan"
//! folder = "sweeps"
//! ```
//!
//! Pieces sharing a `folder` become tabs of the same folder, in file order. `setup` is a script run
//! once every Piece has been added.

use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use serde::Deserialize;

use puzzle_backend::{Folder, Puzzle};

use crate::pieces::PieceKind;

fn default_name() -> String {
    "Puzzle".to_string()
}

fn default_debug() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PuzzleConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_debug")]
    pub debug: bool,
    pub worker_threads: Option<usize>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub setup: String,
    #[serde(default)]
    pub pieces: Vec<PieceConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PieceConfig {
    pub name: String,
    pub kind: PieceKind,
    pub folder: Option<String>,
}

impl PuzzleConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Creates the Puzzle, adds every Piece and runs `setup`.
    pub fn build(&self) -> anyhow::Result<Puzzle> {
        let mut builder = Puzzle::builder().name(&self.name).debug(self.debug);
        if let Some(threads) = self.worker_threads {
            builder = builder.worker_threads(threads);
        }
        let puzzle = builder.build()?;

        let mut folders: IndexMap<&str, Folder> = IndexMap::new();
        for piece in &self.pieces {
            let definition = piece.kind.definition();
            let added = match &piece.folder {
                Some(folder) => folders
                    .entry(folder.as_str())
                    .or_insert_with(|| puzzle.add_folder())
                    .add_boxed_piece(&piece.name, definition),
                None => puzzle.add_boxed_piece(&piece.name, definition),
            };
            added.with_context(|| format!("Cannot add piece '{}'", piece.name))?;
            log::debug!("added {:?} piece '{}'", piece.kind, piece.name);
        }

        if !self.setup.is_empty() {
            puzzle.run(&self.setup).context("setup script failed")?;
        }
        log::info!(
            "puzzle '{}' ready with {} piece(s)",
            puzzle.name(),
            puzzle.pieces().len()
        );
        Ok(puzzle)
    }
}
