//! Symbol tables of the "variables and functions" and "models" sections.
//!
//! Resolution runs in three pure stages, each over the previous stage's table:
//!
//! 1. [`ParameterTable::build`] from `$name = value` lines
//! 2. [`FunctionTable::resolve`] substitutes `$name` tokens into `%id = Type(args)`
//! 3. [`ModelTable::resolve`] substitutes `%id` tokens into `@N: F = ...`
//!
//! Every substitution is a single pass keyed by exact token match. Tokens that
//! do not resolve stay in the text and are reported as [`ParseAnomaly`] values.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::engine::expr::{eval_constant, split_top_level};
use crate::session::ParseAnomaly;

static PARAM_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("parameter token pattern"));
static FUNC_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%([A-Za-z_][A-Za-z0-9_]*)").expect("function token pattern"));
static MODEL_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@(\d+)\s*[:.]\s*F\s*(\+?=)\s*(.*)$").expect("model line pattern"));

/// Remove a trailing `# annotation` and `[lo:hi]` domain.
fn strip_value_suffixes(raw: &str) -> &str {
    let raw = raw.split('#').next().unwrap_or("").trim();
    match raw.rfind('[') {
        Some(idx) if raw.ends_with(']') => raw[..idx].trim(),
        _ => raw,
    }
}

/// Replace every match of `re` in `text`; `lookup` returns `None` for tokens
/// that must stay in place.
fn substitute<F>(re: &Regex, text: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    re.replace_all(text, |c: &Captures<'_>| lookup(&c[1]).unwrap_or_else(|| c[0].to_string()))
        .into_owned()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    /// Value text after substitution of earlier parameters.
    pub text: String,
    /// `None` when the text is not a constant expression.
    pub value: Option<f64>,
    pub unlocked: bool,
}

impl Parameter {
    /// Text that replaces `$name` in a function line.
    pub fn token(&self) -> String {
        let marker = if self.unlocked { "~" } else { "" };
        match self.value {
            Some(v) => format!("{marker}{v}"),
            None => format!("{marker}{}", self.text),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTable {
    params: Vec<Parameter>,
}

impl ParameterTable {
    /// Build from the `$name = value` lines of a section; other lines are skipped.
    pub fn build(lines: &[String]) -> (Self, Vec<ParseAnomaly>) {
        let mut table = ParameterTable::default();
        let mut anomalies = Vec::new();
        for line in lines {
            let Some((lhs, rhs)) = line.strip_prefix('$').and_then(|l| l.split_once('=')) else {
                continue;
            };
            let name = lhs.trim().to_string();
            let value = strip_value_suffixes(rhs);
            let (unlocked, value) = match value.strip_prefix('~') {
                Some(rest) => (true, rest.trim()),
                None => (false, value),
            };
            let text = substitute(&PARAM_TOKEN, value, |token| match table.get(token) {
                Some(p) => Some(match p.value {
                    Some(v) => format!("({v})"),
                    None => format!("({})", p.text),
                }),
                None => {
                    anomalies.push(ParseAnomaly::UnresolvedParameter {
                        name: token.to_string(),
                        context: format!("${name}"),
                    });
                    None
                }
            });
            let value = eval_constant(&text).ok();
            let param = Parameter {
                name,
                text,
                value,
                unlocked,
            };
            match table.params.iter_mut().find(|p| p.name == param.name) {
                Some(existing) => *existing = param,
                None => table.params.push(param),
            }
        }
        (table, anomalies)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// A function with its parameter references substituted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDef {
    pub id: String,
    pub type_name: String,
    /// `Type(args)` with values in place of `$name` tokens.
    pub expression: String,
    /// Positional values; `NaN` where an argument did not resolve to a number.
    pub parameters: Vec<f64>,
}

impl FunctionDef {
    fn from_expression(id: String, expression: String) -> Self {
        let (type_name, args) = match expression.split_once('(') {
            Some((t, rest)) => (t.trim().to_string(), rest.strip_suffix(')').unwrap_or(rest)),
            None => (expression.trim().to_string(), ""),
        };
        let parameters = split_top_level(args, ',')
            .into_iter()
            .filter(|a| !a.is_empty())
            .map(|a| {
                let a = strip_value_suffixes(a);
                eval_constant(a.strip_prefix('~').unwrap_or(a)).unwrap_or(f64::NAN)
            })
            .collect();
        Self {
            id,
            type_name,
            expression,
            parameters,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionTable {
    functions: Vec<FunctionDef>,
}

impl FunctionTable {
    /// Resolve the `%id = Type(args)` lines of a section against `params`.
    pub fn resolve(lines: &[String], params: &ParameterTable) -> (Self, Vec<ParseAnomaly>) {
        let mut table = FunctionTable::default();
        let mut anomalies = Vec::new();
        for line in lines {
            if line.starts_with('$') {
                continue;
            }
            let Some((lhs, rhs)) = line.strip_prefix('%').and_then(|l| l.split_once('=')) else {
                anomalies.push(ParseAnomaly::UnrecognizedLine {
                    section: "variables and functions",
                    line: line.clone(),
                });
                continue;
            };
            let id = lhs.trim().to_string();
            let expression = substitute(&PARAM_TOKEN, rhs.trim(), |token| match params.get(token) {
                Some(p) => Some(p.token()),
                None => {
                    anomalies.push(ParseAnomaly::UnresolvedParameter {
                        name: token.to_string(),
                        context: format!("%{id}"),
                    });
                    None
                }
            });
            let def = FunctionDef::from_expression(id, expression);
            match table.functions.iter_mut().find(|f| f.id == def.id) {
                Some(existing) => *existing = def,
                None => table.functions.push(def),
            }
        }
        (table, anomalies)
    }

    pub fn get(&self, id: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// One dataset's model after substitution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelDef {
    pub dataset: usize,
    /// Sum of function expressions; empty when the model has no functions.
    pub formula: String,
    /// The `%id` tokens of the source line, in order.
    pub function_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTable {
    models: Vec<ModelDef>,
}

impl ModelTable {
    /// Resolve `@N: F = %a + %b` (and `F +=`) lines against `functions`.
    pub fn resolve(lines: &[String], functions: &FunctionTable) -> (Self, Vec<ParseAnomaly>) {
        let mut table = ModelTable::default();
        let mut anomalies = Vec::new();
        for line in lines {
            let parsed = MODEL_LINE
                .captures(line)
                .and_then(|c| Some((c[1].parse::<usize>().ok()?, &c[2] == "+=", c[3].trim().to_string())));
            let Some((dataset, append, rhs)) = parsed else {
                anomalies.push(ParseAnomaly::UnrecognizedLine {
                    section: "models",
                    line: line.clone(),
                });
                continue;
            };

            let mut ids = Vec::new();
            let formula = if rhs == "0" || rhs.is_empty() {
                String::new()
            } else {
                substitute(&FUNC_TOKEN, &rhs, |id| {
                    ids.push(id.to_string());
                    match functions.get(id) {
                        Some(f) => Some(f.expression.clone()),
                        None => {
                            anomalies.push(ParseAnomaly::UnresolvedFunction {
                                id: id.to_string(),
                                dataset,
                            });
                            None
                        }
                    }
                })
            };

            let slot = match table.models.iter_mut().position(|m| m.dataset == dataset) {
                Some(idx) => &mut table.models[idx],
                None => {
                    table.models.push(ModelDef {
                        dataset,
                        ..ModelDef::default()
                    });
                    let last = table.models.len() - 1;
                    &mut table.models[last]
                }
            };
            if append && !slot.formula.is_empty() {
                if !formula.is_empty() {
                    slot.formula = format!("{} + {formula}", slot.formula);
                }
                slot.function_ids.extend(ids);
            } else {
                slot.formula = formula;
                slot.function_ids = ids;
            }
        }
        (table, anomalies)
    }

    pub fn get(&self, dataset: usize) -> Option<&ModelDef> {
        self.models.iter().find(|m| m.dataset == dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_patterns_compile() {
        assert!(PARAM_TOKEN.is_match("$_1"));
        assert!(FUNC_TOKEN.is_match("%peak"));
        assert!(MODEL_LINE.is_match("@2: F += %_3"));
    }

    fn lines(src: &str) -> Vec<String> {
        src.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect()
    }

    #[test]
    fn parameters_strip_domain_and_lock_marker() {
        let (table, anomalies) = ParameterTable::build(&lines(
            "$_1 = ~10 [0:20]\n\
             $_2 = 5.5 # fixed\n\
             $_3 = ~$_1 * 2\n\
             $_4 = $_9 + 1\n",
        ));
        assert_eq!(table.len(), 4);
        let p1 = table.get("_1").unwrap();
        assert_eq!((p1.value, p1.unlocked), (Some(10.0), true));
        assert_eq!(table.get("_2").unwrap().value, Some(5.5));
        assert_eq!(table.get("_3").unwrap().value, Some(20.0));
        assert_eq!(table.get("_3").unwrap().token(), "~20");
        assert_eq!(table.get("_4").unwrap().value, None);
        assert_eq!(
            anomalies,
            vec![ParseAnomaly::UnresolvedParameter {
                name: "_9".into(),
                context: "$_4".into()
            }]
        );
    }

    #[test]
    fn functions_take_parameter_values() {
        let src = lines(
            "$_1 = ~10\n$_2 = 5\n$_3 = ~1.5\n\
             %_1 = Gaussian($_1, $_2, $_3)\n\
             %bg = Constant($_7)\n",
        );
        let (params, _) = ParameterTable::build(&src);
        let (funcs, anomalies) = FunctionTable::resolve(&src, &params);
        let g = funcs.get("_1").unwrap();
        assert_eq!(g.type_name, "Gaussian");
        assert_eq!(g.expression, "Gaussian(~10, 5, ~1.5)");
        assert_eq!(g.parameters, vec![10.0, 5.0, 1.5]);
        let bg = funcs.get("bg").unwrap();
        assert_eq!(bg.expression, "Constant($_7)");
        assert!(bg.parameters[0].is_nan());
        assert_eq!(anomalies.len(), 1);
    }

    #[test]
    fn models_substitute_function_expressions() {
        let src = lines("$_1 = ~2\n%_1 = Constant($_1)\n%_2 = Linear(1, $_1)\n");
        let (params, _) = ParameterTable::build(&src);
        let (funcs, _) = FunctionTable::resolve(&src, &params);
        let (models, anomalies) = ModelTable::resolve(
            &lines("@0: F = %_1 + %_2\n@1: F = 0\n@2: F = %_1 + %nope\n@0: F += %_1\n"),
            &funcs,
        );
        let m0 = models.get(0).unwrap();
        assert_eq!(m0.formula, "Constant(~2) + Linear(1, ~2) + Constant(~2)");
        assert_eq!(m0.function_ids, vec!["_1", "_2", "_1"]);
        let m1 = models.get(1).unwrap();
        assert!(m1.formula.is_empty() && m1.function_ids.is_empty());
        let m2 = models.get(2).unwrap();
        assert_eq!(m2.formula, "Constant(~2) + %nope");
        assert_eq!(
            anomalies,
            vec![ParseAnomaly::UnresolvedFunction {
                id: "nope".into(),
                dataset: 2
            }]
        );
        assert!(models.get(3).is_none());
    }
}
