use puzzle_backend::parse::parse_params;
use puzzle_backend::{HasParams, ParamConfig, Piece, PieceDefinition, Result};

/// Setting `value` sets every param listed in `params` (`piece:param, piece:param`) to it.
pub struct ParamSetter;

impl PieceDefinition for ParamSetter {
    fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
        let targets = piece.define_param("params", ParamConfig::text(""))?;
        let value = piece.define_param("value", ParamConfig::text("file"))?;
        let puzzle = piece.puzzle().clone();
        value.attach_setter(move |value| {
            let list = targets.value().map(|v| v.to_string()).unwrap_or_default();
            if !list.is_empty() {
                let puzzle = puzzle.upgrade()?;
                for param in parse_params(&list, &puzzle)? {
                    param.set_value(Some(value.clone()))?;
                }
            }
            Ok(Some(value))
        });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use puzzle_backend::{Puzzle, Value};

    struct Files;

    impl PieceDefinition for Files {
        fn define_params(&mut self, piece: &mut Piece) -> Result<()> {
            piece.define_param("name", ParamConfig::text(""))?;
            piece.define_param("backup", ParamConfig::text(""))?;
            Ok(())
        }
    }

    #[test]
    fn forwards_to_every_target() {
        let puzzle = Puzzle::builder().build().unwrap();
        puzzle.add_piece("files", Files).unwrap();
        puzzle.add_piece("setter", ParamSetter).unwrap();
        puzzle
            .run("set:setter:params:files:name, files:backup\nset:setter:value:run_01")
            .unwrap();
        for reference in ["files:name", "files:backup", "setter:value"] {
            assert_eq!(
                puzzle.param(reference).unwrap().value(),
                Some(Value::from("run_01"))
            );
        }
    }

    #[test]
    fn empty_list_only_sets_itself() {
        let puzzle = Puzzle::builder().build().unwrap();
        puzzle.add_piece("setter", ParamSetter).unwrap();
        puzzle.run("set:setter:value:x").unwrap();
        assert_eq!(
            puzzle.param("setter:value").unwrap().value(),
            Some(Value::from("x"))
        );
    }
}
