//! Parameter sweeps.
//!
//! [`Sweep`] holds the params shared by both scan Pieces (`params`, `start`, `end`, `step`,
//! `finish`, `settle`, `progress`) and runs the loop: set every target, wait `settle` seconds, run
//! the step, process events, check for a stop. The targets are set to `finish` afterwards.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use ndarray::Array1;

use puzzle_backend::parse::{self, parse_params};
use puzzle_backend::{
    CancellationToken, HasActions, HasParams, Param, ParamConfig, Piece, PieceDefinition,
    PuzzleHandle, Result, StepIterator,
};

/// Largest number of points a single sweep may visit.
pub(crate) const MAX_POINTS: usize = 1_000_000;

pub(crate) struct Sweep {
    puzzle: PuzzleHandle,
    stop: CancellationToken,
    targets: Arc<Param>,
    start: Arc<Param>,
    end: Arc<Param>,
    step: Arc<Param>,
    finish: Arc<Param>,
    settle: Arc<Param>,
    progress: Arc<Param>,
}

fn float(param: &Param) -> f64 {
    param.value().and_then(|v| v.as_float()).unwrap_or_default()
}

fn text(param: &Param) -> String {
    param.value().map(|v| v.to_string()).unwrap_or_default()
}

impl Sweep {
    pub(crate) fn define_params(piece: &mut Piece, start: f64, end: f64, step: f64) -> Result<()> {
        piece.define_param("params", ParamConfig::text(""))?;
        piece.define_param("start", ParamConfig::float(start))?;
        piece.define_param("end", ParamConfig::float(end))?;
        piece.define_param("step", ParamConfig::float(step))?;
        piece.define_param("finish", ParamConfig::float(0.))?;
        piece.define_param("settle", ParamConfig::float(0.05).range(0., 60.))?;
        piece.define_param("progress", ParamConfig::int(0).visible(false))?;
        Ok(())
    }

    pub(crate) fn from_piece(piece: &Piece) -> Result<Self> {
        Ok(Self {
            puzzle: piece.puzzle().clone(),
            stop: piece.stop_token().clone(),
            targets: piece.param("params")?.clone(),
            start: piece.param("start")?.clone(),
            end: piece.param("end")?.clone(),
            step: piece.param("step")?.clone(),
            finish: piece.param("finish")?.clone(),
            settle: piece.param("settle")?.clone(),
            progress: piece.param("progress")?.clone(),
        })
    }

    pub(crate) fn puzzle(&self) -> &PuzzleHandle {
        &self.puzzle
    }

    /// `start, start + step, ...` up to but excluding `end`.
    pub(crate) fn values(&self) -> anyhow::Result<Array1<f64>> {
        let (start, end, step) = (float(&self.start), float(&self.end), float(&self.step));
        if step == 0. || !step.is_finite() || (end - start) * step < 0. {
            bail!("Cannot sweep from {} to {} in steps of {}", start, end, step);
        }
        let points = ((end - start) / step).ceil();
        if !points.is_finite() || points > MAX_POINTS as f64 {
            bail!("Sweep of {} points exceeds the limit of {}", points, MAX_POINTS);
        }
        Ok(Array1::range(start, end, step))
    }

    /// Runs `step(index, value)` at every point until it returns `false` or a stop is requested.
    pub(crate) fn run<F>(&self, mut step: F) -> anyhow::Result<()>
    where
        F: FnMut(usize, f64) -> anyhow::Result<bool>,
    {
        let puzzle = self.puzzle.upgrade()?;
        let values = self.values()?;
        let list = text(&self.targets);
        let targets = if list.is_empty() {
            Vec::new()
        } else {
            parse_params(&list, &puzzle)?
        };
        let settle = Duration::from_secs_f64(float(&self.settle).max(0.));
        self.stop.reset();
        log::debug!("sweeping {} point(s) over '{}'", values.len(), list);

        for (i, value) in values.iter().enumerate() {
            for target in &targets {
                target.set(*value)?;
            }
            if !settle.is_zero() {
                thread::sleep(settle);
            }
            let go_on = step(i, *value)?;
            self.progress.set(i + 1)?;
            puzzle.process_events();
            if !go_on || self.stop.is_cancelled() {
                log::debug!("sweep stopped after {} point(s)", i + 1);
                break;
            }
        }
        let finish = float(&self.finish);
        for target in &targets {
            target.set(finish)?;
        }
        Ok(())
    }
}

impl StepIterator for Sweep {
    fn iterate(&self, body: &mut dyn FnMut(usize) -> Result<bool>) -> Result<()> {
        Ok(self.run(|i, _| Ok(body(i)?))?)
    }
}

/// Sweeps `params` and runs the `action` script at every step. A truthy `break` param ends the
/// sweep early.
pub struct Scan;

impl PieceDefinition for Scan {
    fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
        Sweep::define_params(piece, 8., 60., 2.)?;
        piece.define_param("action", ParamConfig::text(""))?;
        piece.define_param("break", ParamConfig::text(""))?;
        Ok(())
    }

    fn define_actions(&mut self, piece: &mut Piece) -> Result<()> {
        let sweep = Arc::new(Sweep::from_piece(piece)?);
        let action = piece.param("action")?.clone();
        let break_on = piece.param("break")?.clone();
        let s = sweep.clone();
        piece.define_action("Scan", move |_| {
            let puzzle = s.puzzle().upgrade()?;
            let command = text(&action);
            let break_list = text(&break_on);
            let stop_when = if break_list.is_empty() {
                None
            } else {
                parse_params(&break_list, &puzzle)?.into_iter().next()
            };
            s.run(|_, _| {
                if !command.is_empty() {
                    parse::run(&command, &puzzle).context("scan step failed")?;
                }
                Ok(match &stop_when {
                    Some(param) => !param.get_value()?.map_or(false, |v| v.is_truthy()),
                    None => true,
                })
            })?;
            Ok(None)
        })?;
        piece.set_iterator(sweep);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use parking_lot::Mutex;
    use puzzle_backend::{Puzzle, Value};

    // Records every value its `x` is set to.
    struct Stage(Arc<Mutex<Vec<f64>>>);

    impl PieceDefinition for Stage {
        fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
            let x = piece.define_param("x", ParamConfig::float(0.))?;
            let seen = self.0.clone();
            x.attach_setter(move |v| {
                seen.lock().push(v.as_float().unwrap_or_default());
                Ok(None)
            });
            piece.define_param("full", ParamConfig::checkbox(false))?;
            Ok(())
        }
    }

    fn setup() -> (Puzzle, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let puzzle = Puzzle::builder().build().unwrap();
        puzzle.add_piece("stage", Stage(seen.clone())).unwrap();
        puzzle.add_piece("scan", Scan).unwrap();
        puzzle
            .run("set:scan:params:stage:x; set:scan:settle:0; set:scan:finish:-1")
            .unwrap();
        (puzzle, seen)
    }

    #[test]
    fn sweeps_then_finishes() {
        let (puzzle, seen) = setup();
        puzzle
            .run("set:scan:start:0; set:scan:end:3; set:scan:step:1")
            .unwrap();
        puzzle.action("scan:Scan").unwrap().trigger().unwrap();
        assert_eq!(*seen.lock(), vec![0., 1., 2., -1.]);
        assert_eq!(
            puzzle.param("scan:progress").unwrap().value(),
            Some(Value::Int(3))
        );
    }

    #[test]
    fn failing_step_aborts() {
        let (puzzle, seen) = setup();
        puzzle
            .run("set:scan:start:0; set:scan:end:3; set:scan:step:1; set:scan:action:run:scan:noop")
            .unwrap();
        let err = puzzle.action("scan:Scan").unwrap().trigger().unwrap_err();
        assert_eq!(err.to_string(), "scan step failed");
        // no finish value after a failure
        assert_eq!(*seen.lock(), vec![0.]);
    }

    #[test]
    fn break_param_ends_early() {
        let (puzzle, seen) = setup();
        puzzle
            .run("set:scan:start:0; set:scan:end:10; set:scan:step:2; set:scan:break:stage:full")
            .unwrap();
        puzzle
            .param("scan:action")
            .unwrap()
            .set("set:stage:full:1")
            .unwrap();
        puzzle.action("scan:Scan").unwrap().trigger().unwrap();
        assert_eq!(*seen.lock(), vec![0., -1.]);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let (puzzle, _) = setup();
        puzzle.run("set:scan:step:0").unwrap();
        assert!(puzzle.action("scan:Scan").unwrap().trigger().is_err());
        puzzle.run("set:scan:step:-1").unwrap();
        assert!(puzzle.action("scan:Scan").unwrap().trigger().is_err());
    }

    #[test]
    fn oversized_sweeps_are_rejected_before_running() {
        let (puzzle, seen) = setup();
        puzzle
            .run("set:scan:start:0; set:scan:end:1000000000; set:scan:step:0.000000001")
            .unwrap();
        let err = puzzle.action("scan:Scan").unwrap().trigger().unwrap_err();
        assert!(format!("{:#}", err).contains("exceeds the limit of 1000000"));
        assert!(seen.lock().is_empty());

        // exactly at the limit is still allowed
        puzzle.run("set:scan:end:1000000; set:scan:step:1").unwrap();
        let sweep = Sweep::from_piece(&puzzle.piece("scan").unwrap()).unwrap();
        assert_eq!(sweep.values().unwrap().len(), MAX_POINTS);
    }

    #[test]
    fn iterator_steps_and_stops() {
        let (puzzle, seen) = setup();
        puzzle
            .run("set:scan:start:0; set:scan:end:5; set:scan:step:1")
            .unwrap();
        let iterator = puzzle.piece("scan").unwrap().iterator().cloned().unwrap();
        let mut steps = Vec::new();
        iterator
            .iterate(&mut |i| {
                steps.push(i);
                Ok(i < 2)
            })
            .unwrap();
        assert_eq!(steps, vec![0, 1, 2]);
        assert_eq!(*seen.lock(), vec![0., 1., 2., -1.]);
    }

    #[test]
    fn global_stop_interrupts() {
        let (puzzle, seen) = setup();
        puzzle
            .run("set:scan:start:0; set:scan:end:5; set:scan:step:1")
            .unwrap();
        let iterator = puzzle.piece("scan").unwrap().iterator().cloned().unwrap();
        let p = puzzle.clone();
        iterator
            .iterate(&mut |i| {
                if i == 1 {
                    p.call_stop();
                }
                Ok(true)
            })
            .unwrap();
        assert_eq!(*seen.lock(), vec![0., 1., -1.]);
    }
}
