//! Section splitting for session text.

use std::sync::LazyLock;

use regex::Regex;

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s*-{2,}\s*(.+?)\s*-{2,}\s*$").expect("section header pattern"));

/// Raw bodies of the sections the parser reads. Repeated sections are
/// concatenated in file order; comment and blank lines are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sections {
    pub defines: Vec<String>,
    pub datasets: Vec<String>,
    pub variables: Vec<String>,
    pub models: Vec<String>,
}

#[derive(Clone, Copy)]
enum Kind {
    Defines,
    Datasets,
    Variables,
    Models,
    Ignored,
}

fn header_name(line: &str) -> Option<String> {
    HEADER.captures(line.trim()).map(|c| c[1].to_ascii_lowercase())
}

fn kind_of(name: &str) -> Kind {
    match name {
        "(un)defines" | "defines" => Kind::Defines,
        "datasets" => Kind::Datasets,
        "variables and functions" => Kind::Variables,
        "models" => Kind::Models,
        _ => Kind::Ignored,
    }
}

pub fn split_sections(text: &str) -> Sections {
    let mut out = Sections::default();
    let mut current = Kind::Ignored;
    for line in text.lines() {
        if let Some(name) = header_name(line) {
            current = kind_of(&name);
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let body = match current {
            Kind::Defines => &mut out.defines,
            Kind::Datasets => &mut out.datasets,
            Kind::Variables => &mut out.variables,
            Kind::Models => &mut out.models,
            Kind::Ignored => continue,
        };
        body.push(trimmed.to_string());
    }
    out
}
