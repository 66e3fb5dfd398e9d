use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use puzzle_backend::{HasActions, HasParams, ParamConfig, ParamKind, Piece, PieceDefinition, Result, Value};

/// Draws integers between `min` and `max` from a generator reseeded by `seed`.
pub struct RandomNumber {
    rng: Arc<Mutex<StdRng>>,
}

impl Default for RandomNumber {
    fn default() -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(0))),
        }
    }
}

impl PieceDefinition for RandomNumber {
    fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
        piece.define_param("min", ParamConfig::int(0))?;
        piece.define_param("max", ParamConfig::int(10))?;

        let seed = piece.define_param("seed", ParamConfig::int(0).range(0., 1e9))?;
        let rng = self.rng.clone();
        seed.attach_setter(move |value| {
            let seed = value.as_int().unwrap_or_default().max(0) as u64;
            *rng.lock() = StdRng::seed_from_u64(seed);
            Ok(Some(value))
        });
        Ok(())
    }

    fn define_readouts(&mut self, piece: &mut Piece) -> Result<()> {
        let min = piece.param("min")?.clone();
        let max = piece.param("max")?.clone();
        let rng = self.rng.clone();
        piece.define_readout("number", ParamKind::int(), move || {
            let a = min.value().and_then(|v| v.as_int()).unwrap_or_default();
            let b = max.value().and_then(|v| v.as_int()).unwrap_or_default();
            let number = rng.lock().gen_range(a.min(b)..=a.max(b));
            Ok(Value::Int(number))
        })?;
        Ok(())
    }

    fn define_actions(&mut self, piece: &mut Piece) -> Result<()> {
        let puzzle = piece.puzzle().clone();
        let dialog = format!(
            "prompt:In a range between {{{name}:min}} and {{{name}:max}}, your number is {{{name}:number}}",
            name = piece.name()
        );
        piece.define_action("Dialog", move |_| {
            puzzle.upgrade()?.run(&dialog)?;
            Ok(None)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use puzzle_backend::Puzzle;

    #[test]
    fn seeding_repeats_the_sequence() {
        let puzzle = Puzzle::builder().build().unwrap();
        puzzle.add_piece("rng", RandomNumber::default()).unwrap();
        let number = puzzle.param("rng:number").unwrap();
        let draw = || -> Vec<Option<Value>> {
            (0..5).map(|_| number.get_value().unwrap()).collect()
        };

        puzzle.run("set:rng:seed:42").unwrap();
        let first = draw();
        puzzle.run("set:rng:seed:42").unwrap();
        assert_eq!(draw(), first);
        for value in first {
            let v = value.and_then(|v| v.as_int()).unwrap();
            assert!((0..=10).contains(&v));
        }
    }

    #[test]
    fn dialog_interpolates_its_own_params() {
        let puzzle = Puzzle::builder().build().unwrap();
        puzzle.add_piece("dice", RandomNumber::default()).unwrap();
        puzzle.run("set:dice:min:3; set:dice:max:3").unwrap();
        let shown = Arc::new(Mutex::new(String::new()));
        let s = shown.clone();
        puzzle.set_prompt_handler(move |text| {
            *s.lock() = text.to_string();
            Ok(())
        });
        puzzle.action("dice:Dialog").unwrap().trigger().unwrap();
        assert_eq!(
            *shown.lock(),
            "In a range between 3 and 3, your number is 3"
        );
    }
}
