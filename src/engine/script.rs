//! Line-oriented interpreter for the session scripting language.
//!
//! Supported commands (one per line, `#` starts a comment line):
//!
//! - `reset`, `set name = value[, name = value]`
//! - `define Name(p, q=default) = expr`
//! - `@+ = 0`, `@N: title = 'text'`, `M=n in @N`
//! - `X[i]=x, Y[i]=y, S[i]=s, A[i]=1 in @N`
//! - `$name = [~]expr`, `%name = Type(args)`
//! - `@N: F = formula`, `@N: F += formula`
//!
//! A command without an `@N` prefix or `in @N` suffix targets `@0`.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::Point;
use crate::engine::expr::{eval_constant, split_top_level};
use crate::engine::{Engine, EngineError, MemorySession};

static DATASET_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@(\d+)\s*[:.]\s*(.*)$").expect("dataset prefix pattern"));
static DATASET_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s+in\s+@(\d+)\s*$").expect("dataset suffix pattern"));
static POINT_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([XYSA])\[(\d+)\]\s*=\s*(.+)$").expect("point field pattern"));
static POINT_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^M\s*=\s*(\d+)$").expect("point count pattern"));

/// Split `@N: rest` / `rest in @N` into the target dataset and the bare command.
fn target(line: &str) -> (Option<usize>, String) {
    if let Some(c) = DATASET_PREFIX.captures(line) {
        return (c[1].parse().ok(), c[2].trim().to_string());
    }
    if let Some(c) = DATASET_SUFFIX.captures(line) {
        return (c[2].parse().ok(), c[1].trim().to_string());
    }
    (None, line.to_string())
}

/// Execute one script line against `session`.
pub fn execute_line(session: &mut MemorySession, line: &str) -> Result<(), EngineError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(());
    }

    if line == "reset" {
        session.reset();
        return Ok(());
    }
    if let Some(rest) = line.strip_prefix("set ") {
        for assignment in split_top_level(rest, ',') {
            let (name, value) = assignment
                .split_once('=')
                .ok_or_else(|| EngineError::Syntax(format!("expected name = value in '{line}'")))?;
            session.set_option(name.trim(), value.trim())?;
        }
        return Ok(());
    }
    if line.starts_with("define ") {
        return session.define_function_type(line);
    }
    if let Some(rhs) = line.strip_prefix("@+") {
        return match rhs.trim().strip_prefix('=').map(str::trim) {
            Some("0") => {
                session.append_dataset();
                Ok(())
            }
            _ => Err(EngineError::Syntax(format!("only '@+ = 0' is supported, got '{line}'"))),
        };
    }
    if let Some(rest) = line.strip_prefix('$') {
        let (name, rhs) = rest
            .split_once('=')
            .ok_or_else(|| EngineError::Syntax(format!("expected $name = value in '{line}'")))?;
        return session.assign_variable(name.trim(), rhs);
    }
    if let Some(rest) = line.strip_prefix('%') {
        let (name, rhs) = rest
            .split_once('=')
            .ok_or_else(|| EngineError::Syntax(format!("expected %name = Type(...) in '{line}'")))?;
        session.create_function(Some(name.trim()), rhs)?;
        return Ok(());
    }

    let (dataset, command) = target(line);
    let dataset = dataset.unwrap_or(0);
    dataset_command(session, dataset, &command, line)
}

fn dataset_command(session: &mut MemorySession, dataset: usize, command: &str, line: &str) -> Result<(), EngineError> {
    if let Some(formula) = command.strip_prefix("F") {
        let formula = formula.trim_start();
        if let Some(added) = formula.strip_prefix("+=") {
            return session.add_to_model(dataset, added);
        }
        if let Some(replaced) = formula.strip_prefix('=') {
            return session.set_model(dataset, replaced);
        }
    }
    if let Some(rest) = command.strip_prefix("title") {
        let rest = rest.trim_start();
        if let Some(value) = rest.strip_prefix('=') {
            return session.set_dataset_title(dataset, unquote(value.trim()));
        }
    }

    if let Some(c) = POINT_COUNT.captures(command) {
        let n: usize = c[1]
            .parse()
            .map_err(|_| EngineError::Syntax(format!("bad point count in '{line}'")))?;
        session.slot_mut(dataset)?.points.resize(n, Point::new(0.0, 0.0));
        return Ok(());
    }

    let field = &*POINT_FIELD;
    if field.is_match(split_top_level(command, ',').first().copied().unwrap_or("")) {
        for assignment in split_top_level(command, ',') {
            let c = field
                .captures(assignment)
                .ok_or_else(|| EngineError::Syntax(format!("bad point assignment '{assignment}'")))?;
            let index: usize = c[2]
                .parse()
                .map_err(|_| EngineError::Syntax(format!("bad point index in '{assignment}'")))?;
            let value = eval_constant(&c[3])?;
            let point = session
                .slot_mut(dataset)?
                .points
                .get_mut(index)
                .ok_or(EngineError::UnknownPoint { dataset, point: index })?;
            match &c[1] {
                "X" => point.x = value,
                "Y" => point.y = value,
                "S" => point.sigma = value,
                _ => point.active = value != 0.0,
            }
        }
        return Ok(());
    }

    Err(EngineError::Syntax(format!("unsupported command '{line}'")))
}

/// Text between the first and last single quote, or the raw value.
pub fn unquote(value: &str) -> &str {
    match (value.find('\''), value.rfind('\'')) {
        (Some(a), Some(b)) if b > a => &value[a + 1..b],
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_targets() {
        assert_eq!(target("@2: F = 0"), (Some(2), "F = 0".to_string()));
        assert_eq!(target("M=3 in @1"), (Some(1), "M=3".to_string()));
        assert_eq!(target("reset"), (None, "reset".to_string()));
        assert!(POINT_FIELD.is_match("X[0]=1"));
        assert!(POINT_COUNT.is_match("M=12"));
    }

    #[test]
    fn builds_dataset_from_point_lines() {
        let mut s = MemorySession::new();
        s.run_script(
            "reset\n\
             @+ = 0\n\
             @0: title = 'spot 1;2'\n\
             M=3 in @0\n\
             X[0]=0, Y[0]=1, S[0]=1, A[0]=1 in @0\n\
             X[1]=1, Y[1]=9, S[1]=1, A[1]=0 in @0\n\
             X[2]=2, Y[2]=1, S[2]=0.5, A[2]=1 in @0\n",
        )
        .unwrap();
        assert_eq!(s.dataset_count(), 1);
        assert_eq!(s.dataset_title(0).unwrap(), "spot 1;2");
        let p = s.points(0).unwrap();
        assert_eq!(p.len(), 3);
        assert!(!p[1].active);
        assert_eq!(p[1].y, 9.0);
        assert_eq!(p[2].sigma, 0.5);
    }

    #[test]
    fn variables_functions_and_models() {
        let mut s = MemorySession::new();
        s.run_script(
            "@+ = 0\n\
             $_1 = ~10 [0:20]\n\
             $_2 = ~5\n\
             $_3 = 1.5\n\
             %_1 = Gaussian($_1, $_2, $_3)\n\
             @0: F = %_1\n\
             @0: F += Constant(~0.5)\n",
        )
        .unwrap();
        let comps = s.components(0).unwrap();
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].expression(), "Gaussian(~10, ~5, 1.5)");
        assert_eq!(comps[1].type_name, "Constant");
        assert_eq!(s.peak_listing(0, false).unwrap().lines().count(), 3);
    }

    #[test]
    fn settings_and_defines() {
        let mut s = MemorySession::new();
        s.execute("set verbosity = -1, max_wssr_evaluations = 50").unwrap();
        assert_eq!(s.options.verbosity, -1);
        assert_eq!(s.options.max_evaluations, 50);
        s.execute("define Step(a, b=2*a) = a + b*x").unwrap();
        assert!(s.has_function_type("Step"));
        assert!(s.execute("set fitting_method = nelder_mead").is_err());
    }

    #[test]
    fn rejects_unknown_commands() {
        let mut s = MemorySession::new();
        assert!(matches!(s.execute("plot"), Err(EngineError::Syntax(_))));
        assert!(matches!(s.execute("@+ = file.dat"), Err(EngineError::Syntax(_))));
        assert!(matches!(
            s.execute("@3: F = Constant(1)"),
            Err(EngineError::UnknownDataset { index: 3, count: 0 })
        ));
        assert!(s.execute("# comment").is_ok());
    }

    #[test]
    fn unquote_takes_outermost_quotes() {
        assert_eq!(unquote("'a 'b' c'"), "a 'b' c");
        assert_eq!(unquote("plain"), "plain");
    }
}
