//! Function types known to a session.
//!
//! Built-ins follow the fityk parameter conventions (`Gaussian(height, center,
//! hwhm)` and friends). Custom types come from `define` commands and are kept in
//! definition order so a persisted session can replay them.

use std::collections::HashMap;

use crate::engine::expr::{Callee, Expr, parse_expr, split_top_level};
use crate::engine::{EngineError, defined_type_name};

const LN2: f64 = std::f64::consts::LN_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Constant,
    Linear,
    Quadratic,
    Gaussian,
    Lorentzian,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Constant" => Some(Builtin::Constant),
            "Linear" => Some(Builtin::Linear),
            "Quadratic" => Some(Builtin::Quadratic),
            "Gaussian" => Some(Builtin::Gaussian),
            "Lorentzian" => Some(Builtin::Lorentzian),
            _ => None,
        }
    }

    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            Builtin::Constant => &["a0"],
            Builtin::Linear => &["a0", "a1"],
            Builtin::Quadratic => &["a0", "a1", "a2"],
            Builtin::Gaussian | Builtin::Lorentzian => &["height", "center", "hwhm"],
        }
    }

    fn eval(self, x: f64, p: &[f64]) -> f64 {
        match self {
            Builtin::Constant => p[0],
            Builtin::Linear => p[0] + p[1] * x,
            Builtin::Quadratic => p[0] + p[1] * x + p[2] * x * x,
            Builtin::Gaussian => {
                let u = (x - p[1]) / p[2];
                p[0] * (-LN2 * u * u).exp()
            }
            Builtin::Lorentzian => {
                let u = (x - p[1]) / p[2];
                p[0] / (1.0 + u * u)
            }
        }
    }

    /// Center, Height, Area, FWHM.
    fn standard(self, p: &[f64]) -> [Option<f64>; 4] {
        match self {
            Builtin::Constant | Builtin::Linear | Builtin::Quadratic => [None; 4],
            Builtin::Gaussian => [
                Some(p[1]),
                Some(p[0]),
                Some(p[0] * p[2].abs() * (std::f64::consts::PI / LN2).sqrt()),
                Some(2.0 * p[2].abs()),
            ],
            Builtin::Lorentzian => [
                Some(p[1]),
                Some(p[0]),
                Some(p[0] * p[2].abs() * std::f64::consts::PI),
                Some(2.0 * p[2].abs()),
            ],
        }
    }
}

/// A user-defined function type.
#[derive(Debug, Clone)]
pub struct Definition {
    pub name: String,
    pub params: Vec<String>,
    pub defaults: Vec<Option<Expr>>,
    pub body: Expr,
    /// The `define` line exactly as received.
    pub source: String,
}

#[derive(Debug, Clone, Default)]
pub struct Library {
    defined: Vec<Definition>,
}

impl Library {
    pub fn contains(&self, name: &str) -> bool {
        Builtin::from_name(name).is_some() || self.defined.iter().any(|d| d.name == name)
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.defined
    }

    fn find(&self, name: &str) -> Option<&Definition> {
        self.defined.iter().find(|d| d.name == name)
    }

    /// Register a `define` line. Returns `false` when the name already exists.
    pub fn define(&mut self, source: &str) -> Result<bool, EngineError> {
        let name = defined_type_name(source)
            .ok_or_else(|| EngineError::Syntax(format!("bad definition '{source}'")))?
            .to_string();
        if self.contains(&name) {
            return Ok(false);
        }

        let open = source
            .find('(')
            .ok_or_else(|| EngineError::Syntax(format!("bad definition '{source}'")))?;
        let close = matching_paren(source, open)
            .ok_or_else(|| EngineError::Syntax(format!("unbalanced parameter list in '{source}'")))?;
        let rest = source[close + 1..].trim_start();
        let body_src = rest
            .strip_prefix('=')
            .ok_or_else(|| EngineError::Syntax(format!("missing '=' in '{source}'")))?;

        let mut params = Vec::new();
        let mut defaults = Vec::new();
        for piece in split_top_level(&source[open + 1..close], ',') {
            if piece.is_empty() {
                continue;
            }
            match piece.split_once('=') {
                Some((p, default)) => {
                    params.push(p.trim().to_string());
                    defaults.push(Some(parse_expr(default)?));
                }
                None => {
                    params.push(piece.to_string());
                    defaults.push(None);
                }
            }
        }

        let body = parse_expr(body_src)?;
        let mut vars = Vec::new();
        body.variables(&mut vars);
        if let Some(unknown) = vars.iter().find(|v| !params.contains(v)) {
            return Err(EngineError::Undefined {
                kind: "parameter",
                name: format!("{unknown} (in {name})"),
            });
        }
        self.check_calls(&body, &name)?;

        self.defined.push(Definition {
            name,
            params,
            defaults,
            body,
            source: source.trim().to_string(),
        });
        Ok(true)
    }

    // Only already-known types may be called, which rules out recursion.
    fn check_calls(&self, expr: &Expr, defining: &str) -> Result<(), EngineError> {
        match expr {
            Expr::Call(name, args) => {
                let is_math = matches!(name.as_str(), "exp" | "ln" | "sqrt" | "abs");
                if !is_math && !self.contains(name) {
                    return Err(EngineError::UnknownFunctionType(format!("{name} (in {defining})")));
                }
                args.iter().try_for_each(|a| self.check_calls(a, defining))
            }
            Expr::Neg(inner) => self.check_calls(inner, defining),
            Expr::Bin(_, a, b) => {
                self.check_calls(a, defining)?;
                self.check_calls(b, defining)
            }
            Expr::Num(_) | Expr::Var(_) => Ok(()),
        }
    }

    pub fn param_names(&self, type_name: &str) -> Result<Vec<String>, EngineError> {
        if let Some(b) = Builtin::from_name(type_name) {
            return Ok(b.param_names().iter().map(|s| s.to_string()).collect());
        }
        self.find(type_name)
            .map(|d| d.params.clone())
            .ok_or_else(|| EngineError::UnknownFunctionType(type_name.to_string()))
    }

    /// Value for a missing trailing argument, computed from the earlier ones.
    pub fn default_value(&self, type_name: &str, index: usize, given: &[f64]) -> Result<Option<f64>, EngineError> {
        let Some(def) = self.find(type_name) else {
            return Ok(None);
        };
        let Some(Some(default)) = def.defaults.get(index) else {
            return Ok(None);
        };
        let env: HashMap<String, f64> = def.params.iter().cloned().zip(given.iter().copied()).collect();
        default.eval(&env, 0.0, self).map(Some)
    }

    pub fn evaluate(&self, type_name: &str, x: f64, args: &[f64]) -> Result<f64, EngineError> {
        if let Some(b) = Builtin::from_name(type_name) {
            if args.len() != b.param_names().len() {
                return Err(EngineError::Syntax(format!("{type_name} expects {} arguments", b.param_names().len())));
            }
            return Ok(b.eval(x, args));
        }
        let def = self
            .find(type_name)
            .ok_or_else(|| EngineError::UnknownFunctionType(type_name.to_string()))?;
        let env: HashMap<String, f64> = def.params.iter().cloned().zip(args.iter().copied()).collect();
        def.body.eval(&env, x, self)
    }

    /// Center, Height, Area and FWHM where the shape defines them.
    ///
    /// Custom types expose parameters named `center`, `height`, `hwhm` or `fwhm`.
    pub fn standard_values(&self, type_name: &str, args: &[f64]) -> [Option<f64>; 4] {
        if let Some(b) = Builtin::from_name(type_name) {
            return b.standard(args);
        }
        let Some(def) = self.find(type_name) else {
            return [None; 4];
        };
        let named = |n: &str| def.params.iter().position(|p| p == n).and_then(|i| args.get(i).copied());
        let fwhm = named("fwhm").or_else(|| named("hwhm").map(|h| 2.0 * h.abs()));
        [named("center"), named("height"), None, fwhm]
    }
}

impl Callee for Library {
    fn call(&self, name: &str, x: f64, args: &[f64]) -> Option<f64> {
        self.evaluate(name, x, args).ok()
    }
}

/// Index of the parenthesis closing the one at `open`.
pub fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in s[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}
