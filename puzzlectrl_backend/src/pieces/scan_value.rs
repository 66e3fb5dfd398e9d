use std::fmt::Write as _;
use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use parking_lot::Mutex;

use puzzle_backend::parse::{self, parse_params};
use puzzle_backend::{HasActions, HasParams, ParamConfig, Piece, PieceDefinition, Result};

use super::scan::Sweep;

/// Sweeps `params` and records the value of the `obtain` param at every step. `Save` writes the
/// points as CSV to `filename`, which may contain `{piece:param}` references.
#[derive(Default)]
pub struct ScanValue {
    points: Arc<Mutex<Vec<(f64, f64)>>>,
}

impl ScanValue {
    /// The points of the last scan.
    pub fn points(&self) -> Arc<Mutex<Vec<(f64, f64)>>> {
        self.points.clone()
    }
}

impl PieceDefinition for ScanValue {
    fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
        Sweep::define_params(piece, 0., 11., 1.)?;
        piece.define_param("obtain", ParamConfig::text(""))?;
        piece.define_param("filename", ParamConfig::text(""))?;
        Ok(())
    }

    fn define_actions(&mut self, piece: &mut Piece) -> Result<()> {
        let sweep = Arc::new(Sweep::from_piece(piece)?);
        let obtain = piece.param("obtain")?.clone();
        let points = self.points.clone();
        let s = sweep.clone();
        piece.define_action("Scan", move |_| {
            let puzzle = s.puzzle().upgrade()?;
            let reference = obtain.value().map(|v| v.to_string()).unwrap_or_default();
            let source = parse_params(&reference, &puzzle)?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("Nothing to obtain"))?;
            points.lock().clear();
            s.run(|_, x| {
                let y = source
                    .get_value()?
                    .and_then(|v| v.as_float())
                    .ok_or_else(|| anyhow!("'{}' has no numeric value", reference))?;
                points.lock().push((x, y));
                Ok(true)
            })?;
            Ok(None)
        })?;

        let filename = piece.param("filename")?.clone();
        let points = self.points.clone();
        let puzzle = piece.puzzle().clone();
        piece.define_action("Save", move |_| {
            let puzzle = puzzle.upgrade()?;
            let name = filename.value().map(|v| v.to_string()).unwrap_or_default();
            if name.is_empty() {
                bail!("No filename to save to");
            }
            let path = parse::format(&name, &puzzle)?;
            let mut out = String::new();
            for (x, y) in points.lock().iter() {
                writeln!(out, "{:e},{:e}", x, y)?;
            }
            fs::write(&path, out).with_context(|| format!("Cannot write {}", path))?;
            log::info!("saved scan to {}", path);
            Ok(None)
        })?;

        piece.set_iterator(sweep);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use puzzle_backend::{ParamKind, Puzzle, Value};

    struct Detector;

    impl PieceDefinition for Detector {
        fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
            piece.define_param("gain", ParamConfig::float(1.))?;
            Ok(())
        }

        fn define_readouts(&mut self, piece: &mut Piece) -> Result<()> {
            let gain = piece.param("gain")?.clone();
            piece.define_readout("signal", ParamKind::float(), move || {
                let g = gain.value().and_then(|v| v.as_float()).unwrap_or_default();
                Ok(Value::Float(g * g))
            })?;
            Ok(())
        }
    }

    #[test]
    fn records_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let scan = ScanValue::default();
        let points = scan.points();
        let puzzle = Puzzle::builder().build().unwrap();
        puzzle.add_piece("detector", Detector).unwrap();
        puzzle.add_piece("sv", scan).unwrap();
        puzzle
            .run(
                "set:sv:params:detector:gain\n\
                 set:sv:obtain:detector:signal\n\
                 set:sv:settle:0; set:sv:start:1; set:sv:end:4; set:sv:step:1",
            )
            .unwrap();
        puzzle.action("sv:Scan").unwrap().trigger().unwrap();
        assert_eq!(*points.lock(), vec![(1., 1.), (2., 4.), (3., 9.)]);

        let file = dir.path().join("scan_{sv:end}.csv");
        puzzle
            .param("sv:filename")
            .unwrap()
            .set(file.to_string_lossy().into_owned())
            .unwrap();
        puzzle.action("sv:Save").unwrap().trigger().unwrap();
        let saved = fs::read_to_string(dir.path().join("scan_4.0.csv")).unwrap();
        assert_eq!(saved, "1e0,1e0\n2e0,4e0\n3e0,9e0\n");
    }

    #[test]
    fn needs_something_to_obtain() {
        let puzzle = Puzzle::builder().build().unwrap();
        puzzle.add_piece("sv", ScanValue::default()).unwrap();
        let err = puzzle.action("sv:Save").unwrap().trigger().unwrap_err();
        assert_eq!(err.to_string(), "No filename to save to");
        assert!(puzzle.action("sv:Scan").unwrap().trigger().is_err());
    }
}
