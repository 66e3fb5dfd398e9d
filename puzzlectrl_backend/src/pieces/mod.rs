//! Ready-made Pieces.
//!
//! | Kind            | What it does                                                         |
//! |-----------------|----------------------------------------------------------------------|
//! | `random_number` | a seeded random number readout, the "hello world" Piece              |
//! | `param_setter`  | forwards one value to a list of params                               |
//! | `scan`          | sweeps params over a range and runs a command at every step          |
//! | `scan_value`    | sweeps params over a range and records another param, saves CSV      |
//! | `script`        | runs a script, optionally once per step of a scan                    |
//! | `recorder`      | polls a param in the background and keeps the latest points          |

use serde::Deserialize;

use puzzle_backend::PieceDefinition;

pub mod param_setter;
pub mod random_number;
pub mod recorder;
pub mod scan;
pub mod scan_value;
pub mod script;

pub use param_setter::ParamSetter;
pub use random_number::RandomNumber;
pub use recorder::Recorder;
pub use scan::Scan;
pub use scan_value::ScanValue;
pub use script::Script;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PieceKind {
    RandomNumber,
    ParamSetter,
    Scan,
    ScanValue,
    Script,
    Recorder,
}

impl PieceKind {
    pub fn definition(self) -> Box<dyn PieceDefinition> {
        match self {
            PieceKind::RandomNumber => Box::new(RandomNumber::default()),
            PieceKind::ParamSetter => Box::new(ParamSetter),
            PieceKind::Scan => Box::new(Scan),
            PieceKind::ScanValue => Box::new(ScanValue::default()),
            PieceKind::Script => Box::new(Script),
            PieceKind::Recorder => Box::new(Recorder::default()),
        }
    }
}
