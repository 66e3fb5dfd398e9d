//! Error type shared by every module of the backend.
//!
//! Lookup failures (unknown Piece, param or action) are raised eagerly and name the exact token that
//! could not be resolved. Errors produced by user callbacks (setters, getters, actions, worker bodies)
//! travel through [`Error::Callback`] untouched, so callers can still downcast them to their original
//! type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("A Piece with id '{name}' already exists")]
    DuplicatePiece { name: String },

    #[error("A Piece with id '{name}' is required, but doesn't exist")]
    MissingPiece { name: String },

    #[error("Piece '{piece}' has no param '{param}'")]
    MissingParam { piece: String, param: String },

    #[error("Piece '{piece}' has no action '{action}'")]
    MissingAction { piece: String, action: String },

    #[error("A param with id '{name}' already exists in '{owner}'")]
    DuplicateParam { owner: String, name: String },

    #[error("An action with id '{name}' already exists in '{owner}'")]
    DuplicateAction { owner: String, name: String },

    #[error("No global variable with id '{name}'")]
    MissingGlobal { name: String },

    #[error("Cannot release '{name}' since it hasn't been registered with 'require'")]
    UnregisteredGlobal { name: String },

    #[error("Global variable '{name}' does not hold a value of the requested type")]
    GlobalType { name: String },

    #[error("Unknown task in {instruction}")]
    Syntax { instruction: String },

    #[error("Parameter parse error for {token}")]
    ParamParse { token: String },

    #[error("Cannot convert {value} to {kind}")]
    Coercion { value: String, kind: String },

    #[error("Invalid format specifier '{spec}'")]
    Format { spec: String },

    #[error("Row index {index} out of range for a grid with {len} rows")]
    RowIndex { index: usize, len: usize },

    #[error("The Puzzle this handle points to has been closed")]
    PuzzleClosed,

    #[error("The event loop is no longer receiving tasks")]
    EventLoopClosed,

    #[error("Failed to start the worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Callback(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn coercion(value: impl ToString, kind: impl ToString) -> Self {
        Error::Coercion {
            value: value.to_string(),
            kind: kind.to_string(),
        }
    }

    pub(crate) fn syntax(instruction: impl Into<String>) -> Self {
        Error::Syntax {
            instruction: instruction.into(),
        }
    }

    /// Converts back into the `anyhow` error a user callback would return, unwrapping
    /// [`Error::Callback`] instead of nesting it.
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            Error::Callback(err) => err,
            other => anyhow::Error::new(other),
        }
    }

    /// True for errors caused by a name that could not be resolved.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            Error::MissingPiece { .. }
                | Error::MissingParam { .. }
                | Error::MissingAction { .. }
                | Error::MissingGlobal { .. }
                | Error::ParamParse { .. }
        )
    }
}
