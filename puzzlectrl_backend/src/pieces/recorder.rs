use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use parking_lot::Mutex;

use puzzle_backend::parse::parse_params;
use puzzle_backend::{
    HasActions, HasParams, Param, ParamConfig, ParamKind, Piece, PieceDefinition, PuzzleTimer,
    Result, Value,
};

type Points = Arc<Mutex<VecDeque<(f64, f64)>>>;

/// Polls `param` on a worker thread every `sleep` seconds while `live` is checked and keeps the
/// latest `max` points as (seconds since the last clear, value).
pub struct Recorder {
    timer: Option<Arc<PuzzleTimer<(Arc<Param>, Value)>>>,
    points: Points,
    started: Arc<Mutex<Instant>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            timer: None,
            points: Arc::new(Mutex::new(VecDeque::new())),
            started: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl Recorder {
    pub fn points(&self) -> Points {
        self.points.clone()
    }
}

impl PieceDefinition for Recorder {
    fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
        let param = piece.define_param("param", ParamConfig::text(""))?;
        let max = piece.define_param("max", ParamConfig::int(100).range(1., 1e6))?;

        let handle = piece.puzzle().clone();
        let pool = handle.upgrade()?.pool().clone();
        // The source is only read on the worker; storing the reading happens on the owner thread.
        let timer = PuzzleTimer::new(
            &format!("{} live", piece.name()),
            pool,
            move || {
                let puzzle = handle.upgrade()?;
                let reference = param.value().map(|v| v.to_string()).unwrap_or_default();
                let source = parse_params(&reference, &puzzle)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("Nothing to record"))?;
                let value = source
                    .read_value()?
                    .filter(|v| v.as_float().is_some())
                    .ok_or_else(|| anyhow!("'{}' has no numeric value", reference))?;
                Ok((source, value))
            },
            Duration::from_millis(100),
        );

        let points = self.points.clone();
        let started = self.started.clone();
        timer.returned().connect(move |(source, value): &(Arc<Param>, Value)| {
            let y = match source.store_value(value.clone()) {
                Ok(stored) => stored.as_float().unwrap_or_default(),
                Err(err) => {
                    log::warn!("dropped reading of '{}': {}", source.name(), err);
                    return;
                }
            };
            let x = started.lock().elapsed().as_secs_f64();
            let limit = max.value().and_then(|v| v.as_int()).unwrap_or(1).max(1) as usize;
            let mut points = points.lock();
            points.push_back((x, y));
            while points.len() > limit {
                points.pop_front();
            }
        });

        let sleep = piece.define_param("sleep", ParamConfig::float(0.1).range(0., 3600.))?;
        let t = timer.clone();
        sleep.attach_setter(move |value| {
            let seconds = value.as_float().unwrap_or_default().max(0.);
            t.set_sleep(Duration::from_secs_f64(seconds));
            Ok(None)
        });

        let live = piece.define_param("live", ParamConfig::checkbox(false))?;
        let t = timer.clone();
        live.attach_setter(move |value| {
            t.set_checked(value.is_truthy());
            Ok(None)
        });

        self.timer = Some(timer);
        Ok(())
    }

    fn define_readouts(&mut self, piece: &mut Piece) -> Result<()> {
        let points = self.points.clone();
        piece.define_readout("points", ParamKind::int(), move || {
            Ok(Value::from(points.lock().len()))
        })?;
        Ok(())
    }

    fn define_actions(&mut self, piece: &mut Piece) -> Result<()> {
        let points = self.points.clone();
        let started = self.started.clone();
        piece.define_action("Clear", move |_| {
            points.lock().clear();
            *started.lock() = Instant::now();
            Ok(None)
        })?;
        Ok(())
    }

    fn handle_close(&mut self, _piece: &Piece) -> Result<()> {
        if let Some(timer) = &self.timer {
            timer.stop();
        }
        Ok(())
    }

    fn call_stop(&mut self, piece: &Piece) {
        if let Some(timer) = &self.timer {
            timer.stop();
        }
        piece.stop_token().cancel();
    }
}
