//! Toolkit-agnostic core of a laboratory automation framework.
//!
//! Instruments and measurement routines are [`Piece`]s holding typed [`Param`]s and [`Action`]s.
//! A [`Puzzle`] registers them by name, runs command scripts against them ([`parse`]), and moves
//! slow hardware calls onto worker threads ([`threads`]) whose results come back through a single
//! [`EventLoop`].

pub mod action;
pub mod cancel;
pub mod datagrid;
pub mod error;
pub mod event_loop;
pub mod format_spec;
pub mod param;
pub mod parse;
pub mod piece;
pub mod puzzle;
pub mod signal;
pub mod threads;
pub mod value;

pub use action::{Action, Elevate};
pub use cancel::CancellationToken;
pub use datagrid::{DataGrid, Row};
pub use error::{Error, Result};
pub use event_loop::{CallLater, EventLoop, EventLoopHandle};
pub use format_spec::FormatSpec;
pub use param::{Param, ParamConfig, ParamKind};
pub use piece::{ensure, HasActions, HasParams, Piece, PieceDefinition, StepIterator};
pub use puzzle::{Folder, Globals, Puzzle, PuzzleBuilder, PuzzleHandle};
pub use signal::Signal;
pub use threads::{LiveWorker, PuzzleTimer, Worker, WorkerHandle, WorkerPool};
pub use value::Value;
