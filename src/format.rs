//! Response → text
//!
//! Renders a dispatched `Response` as json, yaml, jq program output or a
//! fixed-width human table. The `related` link block is stripped first.

use std::fmt;

use colored::Colorize;
use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, RcIter};
use jaq_json::Val;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use crate::dispatch::{Body, Response};
use crate::error::{CliError, Result};
use crate::resources::identity_field;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Json,
    Yaml,
    Jq,
    Human,
}

impl Format {
    pub const NAMES: [&'static str; 4] = ["json", "yaml", "jq", "human"];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" => Some(Self::Yaml),
            "jq" => Some(Self::Jq),
            "human" => Some(Self::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Jq => "jq",
            Self::Human => "human",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format a response. `None` means there is nothing to print (HTTP 204).
pub fn format_response(
    response: &Response,
    fmt: Format,
    filter: &str,
    changed: bool,
) -> Result<Option<String>> {
    let mut value = match &response.body {
        Body::Empty => return Ok(None),
        Body::Text(text) | Body::Help(text) => return Ok(Some(text.clone())),
        Body::Json(value) => value.clone(),
    };

    strip_related(&mut value);
    let formatted = format_value(&value, fmt, filter)?;

    if changed {
        Ok(Some(formatted.green().to_string()))
    } else {
        Ok(Some(formatted))
    }
}

/// Render a bare JSON value in `fmt`.
pub fn format_value(value: &Value, fmt: Format, filter: &str) -> Result<String> {
    match fmt {
        Format::Json => to_json(value),
        Format::Yaml => Ok(serde_yaml::to_string(value)?),
        Format::Jq => format_jq(value, filter),
        Format::Human => Ok(format_human(value, filter)),
    }
}

/// JSON with five-space indentation.
pub fn to_json(value: &Value) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"     ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn strip_related(value: &mut Value) {
    match value.get_mut("results").and_then(Value::as_array_mut) {
        Some(results) => {
            for item in results {
                if let Some(obj) = item.as_object_mut() {
                    obj.remove("related");
                }
            }
        }
        None => {
            if let Some(obj) = value.as_object_mut() {
                obj.remove("related");
            }
        }
    }
}

/// Columns shown by the human format when no filter was given.
pub fn default_columns(resource: &str) -> String {
    format!("id,{}", identity_field(resource))
}

/// Reshape a flat mapping into `key`/`value` records for the human table.
pub fn transpose(value: &Value) -> Value {
    let results: Vec<Value> = value
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| serde_json::json!({"key": k, "value": v}))
                .collect()
        })
        .unwrap_or_default();
    serde_json::json!({"count": results.len(), "results": results})
}

fn format_human(value: &Value, filter: &str) -> String {
    let records: Vec<&Value> = match value {
        Value::Object(obj) if obj.contains_key("count") => obj
            .get("results")
            .and_then(Value::as_array)
            .map(|items| items.iter().collect())
            .unwrap_or_default(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let filter = if filter == "." { "id,name" } else { filter };
    let columns: Vec<String> = if filter == "*" {
        records
            .first()
            .and_then(|r| r.as_object())
            .map(|obj| {
                obj.iter()
                    .filter(|(_, v)| !v.is_object() && !v.is_array())
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        filter
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    };

    // `*` over zero records leaves nothing to show
    if columns.is_empty() {
        return String::new();
    }

    let mut table: Vec<Vec<String>> = vec![columns.clone()];
    for record in &records {
        table.push(
            columns
                .iter()
                .map(|c| cell(record.get(c).unwrap_or(&Value::Null)))
                .collect(),
        );
    }

    let widths: Vec<usize> = (0..columns.len())
        .map(|i| {
            table
                .iter()
                .map(|row| row[i].chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let render = |row: &[String]| -> String {
        row.iter()
            .zip(&widths)
            .map(|(text, width)| format!("{text:<width$}", width = *width))
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::with_capacity(table.len() + 1);
    lines.push(render(&table[0]));
    lines.push(
        widths
            .iter()
            .map(|w| "=".repeat(*w))
            .collect::<Vec<_>>()
            .join(" "),
    );
    for row in &table[1..] {
        lines.push(render(row));
    }
    lines.join("\n")
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

// -- jq --

/// Run a jq program over `value`.
///
/// Emits one line per output; `null` and empty strings are skipped and
/// strings print raw.
fn format_jq(value: &Value, filter: &str) -> Result<String> {
    let invalid = || CliError::validation(format!("invalid jq filter: {filter}"));
    let program = File {
        code: filter,
        path: (),
    };
    let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let arena = Arena::default();
    let modules = loader.load(&arena, program).map_err(|_| invalid())?;
    let compiled = Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
        .map_err(|_| invalid())?;

    let inputs = RcIter::new(core::iter::empty());
    let mut lines = Vec::new();
    for output in compiled.run((Ctx::new([], &inputs), Val::from(value.clone()))) {
        match output.map_err(|e| CliError::validation(format!("jq: {e}")))? {
            Val::Null => {}
            Val::Str(s) if s.is_empty() => {}
            Val::Str(s) => lines.push(s.to_string()),
            other => lines.push(other.to_string()),
        }
    }
    Ok(lines.join("\n"))
}
