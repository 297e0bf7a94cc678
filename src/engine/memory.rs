//! In-process session backend.
//!
//! State mirrors a fityk session: datasets with points and a model (a list of
//! function names), a global pool of variables, and functions whose arguments
//! are variables. Auto-created names start with `_`; when a model is replaced,
//! the auto-named functions it dropped (and their variables) are collected.

use std::collections::HashMap;

use chrono::Local;
use tracing::{debug, info};

use crate::domain::Point;
use crate::engine::expr::{eval_constant, split_top_level};
use crate::engine::library::Library;
use crate::engine::{Component, ComponentParam, Engine, EngineError};
use crate::math::{LmSettings, jacobian, levenberg_marquardt, parameter_errors, wssr};
use crate::session::peaks::{PeakRecord, PeakTable, Uncertainty, encode_peak_listing};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Variable {
    pub name: String,
    pub value: f64,
    pub unlocked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Function {
    pub name: String,
    pub type_name: String,
    /// Variable names, one per parameter.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DataSlot {
    pub title: String,
    pub points: Vec<Point>,
    pub model: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct Options {
    pub verbosity: i32,
    pub max_evaluations: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            verbosity: 0,
            max_evaluations: 1000,
        }
    }
}

/// Session kept entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    pub(crate) library: Library,
    pub(crate) datasets: Vec<DataSlot>,
    pub(crate) variables: Vec<Variable>,
    pub(crate) functions: Vec<Function>,
    pub(crate) options: Options,
    next_var: usize,
    next_func: usize,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute a whole script (one command per line).
    pub fn run_script(&mut self, script: &str) -> Result<(), EngineError> {
        script.lines().try_for_each(|line| self.execute(line))
    }

    pub(crate) fn slot(&self, index: usize) -> Result<&DataSlot, EngineError> {
        let count = self.datasets.len();
        self.datasets.get(index).ok_or(EngineError::UnknownDataset { index, count })
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Result<&mut DataSlot, EngineError> {
        let count = self.datasets.len();
        self.datasets.get_mut(index).ok_or(EngineError::UnknownDataset { index, count })
    }

    pub(crate) fn append_dataset(&mut self) -> usize {
        self.datasets.push(DataSlot::default());
        self.datasets.len() - 1
    }

    fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Next `_N` not already taken by an explicitly named variable.
    fn fresh_variable_name(&mut self) -> String {
        loop {
            self.next_var += 1;
            let name = format!("_{}", self.next_var);
            if self.variable(&name).is_none() {
                return name;
            }
        }
    }

    fn fresh_function_name(&mut self) -> String {
        loop {
            self.next_func += 1;
            let name = format!("_{}", self.next_func);
            if self.function(&name).is_none() {
                return name;
            }
        }
    }

    fn new_variable(&mut self, value: f64, unlocked: bool) -> String {
        let name = self.fresh_variable_name();
        self.variables.push(Variable {
            name: name.clone(),
            value,
            unlocked,
        });
        name
    }

    /// `$name = [~]expr [domain]`; other variables may appear as `$other`.
    pub(crate) fn assign_variable(&mut self, name: &str, rhs: &str) -> Result<(), EngineError> {
        let (value, unlocked) = self.argument_value(rhs)?;
        match self.variables.iter_mut().find(|v| v.name == name) {
            Some(v) => {
                v.value = value;
                v.unlocked = unlocked;
            }
            None => self.variables.push(Variable {
                name: name.to_string(),
                value,
                unlocked,
            }),
        }
        Ok(())
    }

    /// Numeric value and lock state of an argument text such as `~1.5 [0:3]`.
    fn argument_value(&self, text: &str) -> Result<(f64, bool), EngineError> {
        let text = strip_domain(text);
        let (unlocked, body) = match text.strip_prefix('~') {
            Some(rest) => (true, rest.trim()),
            None => (false, text),
        };
        let mut expr = String::with_capacity(body.len());
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                expr.push(c);
                continue;
            }
            let mut name = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    name.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            let var = self.variable(&name).ok_or_else(|| EngineError::Undefined {
                kind: "variable",
                name: format!("${name}"),
            })?;
            expr.push_str(&format!("({})", var.value));
        }
        Ok((eval_constant(&expr)?, unlocked))
    }

    /// Create a function from `Type(args)`; returns its name.
    pub(crate) fn create_function(&mut self, name: Option<&str>, call: &str) -> Result<String, EngineError> {
        let call = call.trim();
        let (type_name, args_src) = call
            .split_once('(')
            .and_then(|(t, rest)| rest.strip_suffix(')').map(|a| (t.trim(), a)))
            .ok_or_else(|| EngineError::Syntax(format!("expected Type(args), got '{call}'")))?;
        if !self.library.contains(type_name) {
            return Err(EngineError::UnknownFunctionType(type_name.to_string()));
        }
        let param_names = self.library.param_names(type_name)?;
        let pieces: Vec<&str> = split_top_level(args_src, ',').into_iter().filter(|s| !s.is_empty()).collect();
        if pieces.len() > param_names.len() {
            return Err(EngineError::Syntax(format!(
                "{type_name} takes {} arguments, got {}",
                param_names.len(),
                pieces.len()
            )));
        }

        let mut args = Vec::with_capacity(param_names.len());
        let mut given = Vec::with_capacity(param_names.len());
        for piece in &pieces {
            let var_name = if let Some(existing) = piece.strip_prefix('$').filter(|n| self.variable(n).is_some()) {
                existing.to_string()
            } else {
                let (value, unlocked) = self.argument_value(piece)?;
                self.new_variable(value, unlocked)
            };
            given.push(self.variable(&var_name).map(|v| v.value).unwrap_or(f64::NAN));
            args.push(var_name);
        }
        for (index, param) in param_names.iter().enumerate().skip(pieces.len()) {
            let value = self
                .library
                .default_value(type_name, index, &given)?
                .ok_or_else(|| EngineError::Syntax(format!("missing argument '{param}' for {type_name}")))?;
            given.push(value);
            args.push(self.new_variable(value, true));
        }

        let name = match name {
            Some(n) => {
                self.functions.retain(|f| f.name != n);
                n.to_string()
            }
            None => self.fresh_function_name(),
        };
        self.functions.push(Function {
            name: name.clone(),
            type_name: type_name.to_string(),
            args,
        });
        Ok(name)
    }

    /// Resolve a `+`-separated formula into function names, creating new ones.
    fn model_terms(&mut self, formula: &str) -> Result<Vec<String>, EngineError> {
        let formula = formula.trim();
        if formula.is_empty() || formula == "0" {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for term in split_top_level(formula, '+') {
            if term.is_empty() || term == "0" {
                continue;
            }
            if let Some(name) = term.strip_prefix('%') {
                if self.function(name).is_none() {
                    return Err(EngineError::Undefined {
                        kind: "function",
                        name: term.to_string(),
                    });
                }
                names.push(name.to_string());
            } else {
                names.push(self.create_function(None, term)?);
            }
        }
        Ok(names)
    }

    pub(crate) fn add_to_model(&mut self, dataset: usize, formula: &str) -> Result<(), EngineError> {
        self.slot(dataset)?;
        let names = self.model_terms(formula)?;
        self.slot_mut(dataset)?.model.extend(names);
        Ok(())
    }

    /// Drop auto-named functions in `dropped` that no model uses any more, then
    /// the auto-named variables only those functions used.
    fn collect_garbage(&mut self, dropped: Vec<String>) {
        let in_model = |s: &Self, name: &String| s.datasets.iter().any(|d| d.model.contains(name));
        let doomed: Vec<String> = dropped
            .into_iter()
            .filter(|n| n.starts_with('_') && !in_model(self, n))
            .collect();
        if doomed.is_empty() {
            return;
        }
        let orphans: Vec<String> = self
            .functions
            .iter()
            .filter(|f| doomed.contains(&f.name))
            .flat_map(|f| f.args.iter().cloned())
            .collect();
        self.functions.retain(|f| !doomed.contains(&f.name));

        let still_used: Vec<&String> = self.functions.iter().flat_map(|f| f.args.iter()).collect();
        let removable: Vec<String> = orphans
            .into_iter()
            .filter(|v| v.starts_with('_') && !still_used.contains(&v))
            .collect();
        self.variables.retain(|v| !removable.contains(&v.name));
    }

    fn arg_values(&self, f: &Function, overrides: &HashMap<&str, f64>) -> Vec<f64> {
        f.args
            .iter()
            .map(|a| {
                overrides
                    .get(a.as_str())
                    .copied()
                    .or_else(|| self.variable(a).map(|v| v.value))
                    .unwrap_or(f64::NAN)
            })
            .collect()
    }

    fn model_functions(&self, dataset: usize) -> Result<Vec<&Function>, EngineError> {
        self.slot(dataset)?
            .model
            .iter()
            .map(|name| {
                self.function(name).ok_or_else(|| EngineError::Undefined {
                    kind: "function",
                    name: format!("%{name}"),
                })
            })
            .collect()
    }

    /// Unlocked variables used by a dataset's model, in first-use order.
    fn fitted_variables(&self, funcs: &[&Function]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for f in funcs {
            for a in &f.args {
                let unlocked = self.variable(a).map(|v| v.unlocked).unwrap_or(false);
                if unlocked && !out.contains(a) {
                    out.push(a.clone());
                }
            }
        }
        out
    }

    /// Weighted residuals over active points for the given parameter values.
    fn residuals(&self, funcs: &[&Function], points: &[Point], names: &[String], p: &[f64]) -> Vec<f64> {
        let overrides: HashMap<&str, f64> = names.iter().map(String::as_str).zip(p.iter().copied()).collect();
        let args: Vec<(&str, Vec<f64>)> = funcs
            .iter()
            .map(|f| (f.type_name.as_str(), self.arg_values(f, &overrides)))
            .collect();
        points
            .iter()
            .map(|pt| {
                let model: f64 = args
                    .iter()
                    .map(|(t, a)| self.library.evaluate(t, pt.x, a).unwrap_or(f64::NAN))
                    .sum();
                (pt.y - model) / pt.sigma
            })
            .collect()
    }

    fn active_points(&self, dataset: usize) -> Result<Vec<Point>, EngineError> {
        Ok(self.slot(dataset)?.points.iter().filter(|p| p.active).copied().collect())
    }

    /// Standard errors of every unlocked variable used by the dataset.
    fn variable_errors(&self, dataset: usize) -> Result<HashMap<String, Option<f64>>, EngineError> {
        let funcs = self.model_functions(dataset)?;
        let names = self.fitted_variables(&funcs);
        if names.is_empty() {
            return Err(EngineError::NoParametrizedFunctions(dataset));
        }
        let points = self.active_points(dataset)?;
        let p0: Vec<f64> = names
            .iter()
            .map(|n| self.variable(n).map(|v| v.value).unwrap_or(f64::NAN))
            .collect();
        let f = |p: &[f64]| self.residuals(&funcs, &points, &names, p);
        let r0 = f(&p0);
        let jac = jacobian(&f, &p0, &r0);
        let errs = parameter_errors(&jac, wssr(&r0));
        Ok(names.into_iter().zip(errs).collect())
    }

    fn peak_table(&self, dataset: usize, with_errors: bool) -> Result<PeakTable, EngineError> {
        let var_errors = if with_errors {
            Some(self.variable_errors(dataset)?)
        } else {
            None
        };
        let none = HashMap::new();
        let mut records = Vec::new();
        for f in self.model_functions(dataset)? {
            let args = self.arg_values(f, &none);
            let [center, height, area, fwhm] = self.library.standard_values(&f.type_name, &args);
            let errors = var_errors.as_ref().map(|errs| {
                let arg_errors: Vec<Option<f64>> = f
                    .args
                    .iter()
                    .map(|a| match self.variable(a) {
                        Some(v) if v.unlocked => errs.get(a).copied().flatten(),
                        _ => Some(0.0),
                    })
                    .collect();
                let mut out: Vec<Uncertainty> = (0..4)
                    .map(|k| self.standard_error(f, &args, &arg_errors, k))
                    .collect();
                out.extend(arg_errors.iter().map(|e| match e {
                    Some(v) => Uncertainty::Known(*v),
                    None => Uncertainty::Unknown,
                }));
                out
            });
            records.push(PeakRecord {
                id: f.name.clone(),
                type_name: f.type_name.clone(),
                center,
                height,
                area,
                fwhm,
                extra: args,
                errors,
            });
        }
        Ok(PeakTable { records, with_errors })
    }

    /// Propagate argument errors to the `k`-th standard value (diagonal only).
    fn standard_error(&self, f: &Function, args: &[f64], arg_errors: &[Option<f64>], k: usize) -> Uncertainty {
        let Some(base) = self.library.standard_values(&f.type_name, args)[k] else {
            return Uncertainty::Unknown;
        };
        let mut variance = 0.0;
        let mut work = args.to_vec();
        for (j, err) in arg_errors.iter().enumerate() {
            let h = f64::EPSILON.sqrt() * args[j].abs().max(1.0);
            work[j] = args[j] + h;
            let shifted = self.library.standard_values(&f.type_name, &work)[k];
            work[j] = args[j];
            let grad = shifted.map(|s| (s - base) / h).unwrap_or(0.0);
            if grad.abs() < 1e-12 {
                continue;
            }
            match err {
                Some(e) => variance += (grad * e).powi(2),
                None => return Uncertainty::Unknown,
            }
        }
        Uncertainty::Known(variance.sqrt())
    }
}

/// Drop a trailing `[lo:hi]` domain from an argument.
fn strip_domain(text: &str) -> &str {
    let text = text.trim();
    match text.find('[') {
        Some(idx) if text.ends_with(']') => text[..idx].trim(),
        _ => text,
    }
}

fn quote_title(title: &str) -> String {
    format!("'{title}'")
}

impl Engine for MemorySession {
    fn execute(&mut self, command: &str) -> Result<(), EngineError> {
        crate::engine::script::execute_line(self, command)
    }

    fn reset(&mut self) {
        self.datasets.clear();
        self.variables.clear();
        self.functions.clear();
        self.next_var = 0;
        self.next_func = 0;
    }

    fn load_dataset(
        &mut self,
        index: usize,
        x: &[f64],
        y: &[f64],
        sigma: &[f64],
        title: Option<&str>,
    ) -> Result<(), EngineError> {
        if x.len() != y.len() || (!sigma.is_empty() && sigma.len() != x.len()) {
            return Err(EngineError::Syntax(format!(
                "x, y and sigma lengths differ ({}, {}, {})",
                x.len(),
                y.len(),
                sigma.len()
            )));
        }
        if index == self.datasets.len() {
            self.append_dataset();
        }
        let slot = self.slot_mut(index)?;
        slot.points = x
            .iter()
            .zip(y)
            .enumerate()
            .map(|(i, (&x, &y))| Point {
                x,
                y,
                sigma: sigma.get(i).copied().unwrap_or(1.0),
                active: true,
            })
            .collect();
        if let Some(title) = title {
            slot.title = title.to_string();
        }
        Ok(())
    }

    fn dataset_count(&self) -> usize {
        self.datasets.len()
    }

    fn point(&self, dataset: usize, index: usize) -> Result<Point, EngineError> {
        self.slot(dataset)?
            .points
            .get(index)
            .copied()
            .ok_or(EngineError::UnknownPoint { dataset, point: index })
    }

    fn points(&self, dataset: usize) -> Result<Vec<Point>, EngineError> {
        Ok(self.slot(dataset)?.points.clone())
    }

    fn set_point_active(&mut self, dataset: usize, index: usize, active: bool) -> Result<(), EngineError> {
        let point = self
            .slot_mut(dataset)?
            .points
            .get_mut(index)
            .ok_or(EngineError::UnknownPoint { dataset, point: index })?;
        point.active = active;
        Ok(())
    }

    fn define_function_type(&mut self, definition: &str) -> Result<(), EngineError> {
        if !self.library.define(definition)? {
            debug!(definition, "function type already defined; skipping");
        }
        Ok(())
    }

    fn has_function_type(&self, name: &str) -> bool {
        self.library.contains(name)
    }

    fn set_model(&mut self, dataset: usize, formula: &str) -> Result<(), EngineError> {
        self.slot(dataset)?;
        let names = self.model_terms(formula)?;
        let dropped = std::mem::replace(&mut self.slot_mut(dataset)?.model, names);
        self.collect_garbage(dropped);
        Ok(())
    }

    fn clear_model(&mut self, dataset: usize) -> Result<(), EngineError> {
        let dropped = std::mem::take(&mut self.slot_mut(dataset)?.model);
        self.collect_garbage(dropped);
        Ok(())
    }

    fn components(&self, dataset: usize) -> Result<Vec<Component>, EngineError> {
        let none = HashMap::new();
        self.model_functions(dataset)?
            .into_iter()
            .map(|f| -> Result<Component, EngineError> {
                let names = self.library.param_names(&f.type_name)?;
                let values = self.arg_values(f, &none);
                let [center, height, area, fwhm] = self.library.standard_values(&f.type_name, &values);
                let params = names
                    .into_iter()
                    .zip(&f.args)
                    .zip(values)
                    .map(|((name, var), value)| ComponentParam {
                        name,
                        value,
                        unlocked: self.variable(var).map(|v| v.unlocked).unwrap_or(false),
                    })
                    .collect();
                Ok(Component {
                    name: f.name.clone(),
                    type_name: f.type_name.clone(),
                    params,
                    center,
                    height,
                    area,
                    fwhm,
                })
            })
            .collect()
    }

    fn run_fit(&mut self, dataset: usize) -> Result<(), EngineError> {
        let funcs = self.model_functions(dataset)?;
        let names = self.fitted_variables(&funcs);
        if names.is_empty() {
            return Err(EngineError::NoFittableParameters(dataset));
        }
        let points = self.active_points(dataset)?;
        if points.is_empty() {
            return Err(EngineError::NoActivePoints(dataset));
        }
        let p0: Vec<f64> = names
            .iter()
            .map(|n| self.variable(n).map(|v| v.value).unwrap_or(f64::NAN))
            .collect();
        let settings = LmSettings {
            max_evaluations: self.options.max_evaluations,
            ..LmSettings::default()
        };
        let outcome = levenberg_marquardt(|p| self.residuals(&funcs, &points, &names, p), &p0, &settings);

        if self.options.verbosity >= 0 {
            info!(
                dataset,
                params = names.len(),
                wssr_before = outcome.initial_wssr,
                wssr_after = outcome.wssr,
                evaluations = outcome.evaluations,
                "fit finished"
            );
        }

        for (name, value) in names.iter().zip(outcome.params) {
            if let Some(v) = self.variables.iter_mut().find(|v| &v.name == name) {
                v.value = value;
            }
        }
        Ok(())
    }

    fn peak_listing(&self, dataset: usize, with_errors: bool) -> Result<String, EngineError> {
        Ok(encode_peak_listing(&self.peak_table(dataset, with_errors)?))
    }

    fn dataset_title(&self, dataset: usize) -> Result<String, EngineError> {
        Ok(self.slot(dataset)?.title.clone())
    }

    fn set_dataset_title(&mut self, dataset: usize, title: &str) -> Result<(), EngineError> {
        self.slot_mut(dataset)?.title = title.to_string();
        Ok(())
    }

    fn state_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "# Fityk script. Created by spectral-fitmap on {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str("reset\n");

        out.push_str("# ------------  settings  ------------\n");
        out.push_str(&format!("set verbosity = {}\n", self.options.verbosity));
        out.push_str(&format!("set max_wssr_evaluations = {}\n", self.options.max_evaluations));

        out.push_str("# ------------  (un)defines  ------------\n");
        for def in self.library.definitions() {
            out.push_str(&def.source);
            out.push('\n');
        }

        out.push_str("# ------------  datasets  ------------\n");
        for (i, slot) in self.datasets.iter().enumerate() {
            out.push_str("@+ = 0\n");
            if !slot.title.is_empty() {
                out.push_str(&format!("@{i}: title = {}\n", quote_title(&slot.title)));
            }
            out.push_str(&format!("M={} in @{i}\n", slot.points.len()));
            for (j, p) in slot.points.iter().enumerate() {
                out.push_str(&format!(
                    "X[{j}]={}, Y[{j}]={}, S[{j}]={}, A[{j}]={} in @{i}\n",
                    p.x,
                    p.y,
                    p.sigma,
                    u8::from(p.active)
                ));
            }
        }

        out.push_str("# ------------  variables and functions  ------------\n");
        for v in &self.variables {
            let marker = if v.unlocked { "~" } else { "" };
            out.push_str(&format!("${} = {marker}{}\n", v.name, v.value));
        }
        for f in &self.functions {
            let args: Vec<String> = f.args.iter().map(|a| format!("${a}")).collect();
            out.push_str(&format!("%{} = {}({})\n", f.name, f.type_name, args.join(", ")));
        }

        out.push_str("# ------------  models  ------------\n");
        for (i, slot) in self.datasets.iter().enumerate() {
            if slot.model.is_empty() {
                continue;
            }
            let terms: Vec<String> = slot.model.iter().map(|n| format!("%{n}")).collect();
            out.push_str(&format!("@{i}: F = {}\n", terms.join(" + ")));
        }
        out.push_str("# ------------  non-model functions  ------------\n");
        out
    }

    fn set_option(&mut self, name: &str, value: &str) -> Result<(), EngineError> {
        let value = value.trim();
        let bad = || EngineError::Syntax(format!("invalid value '{value}' for option '{name}'"));
        match name.trim() {
            "verbosity" => self.options.verbosity = value.parse().map_err(|_| bad())?,
            "max_wssr_evaluations" => self.options.max_evaluations = value.parse().map_err(|_| bad())?,
            other => return Err(EngineError::UnknownOption(other.to_string())),
        }
        Ok(())
    }
}
