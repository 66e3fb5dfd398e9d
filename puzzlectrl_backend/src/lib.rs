//! Ready-made Pieces for `puzzle_backend` and the `puzzlectrl` runner: a Puzzle layout read from
//! TOML, driven by command scripts from the terminal.

pub mod cli;
pub mod config;
pub mod pieces;

pub use crate::cli::{execute, init_logging, Cli, Commands};
pub use crate::config::{PieceConfig, PuzzleConfig};
pub use crate::pieces::PieceKind;
