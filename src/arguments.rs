//! Schema IR → clap flags
//!
//! Turns the per-method field metadata of an `OptionsSchema` into clap
//! arguments for one generic action, applying the quirk overrides the
//! OPTIONS metadata cannot express.

use std::fmt;
use std::path::PathBuf;

use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::{Arg, ArgAction, Command};
use serde_json::Value;

use crate::error::{CliError, Result};
use crate::options::{FieldMeta, FieldType, HttpMethod, OptionsSchema};

/// Generic actions every non-control resource can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    List,
    Create,
    Get,
    Modify,
    Delete,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::List,
        Action::Create,
        Action::Get,
        Action::Modify,
        Action::Delete,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "list" => Some(Self::List),
            "create" => Some(Self::Create),
            "get" => Some(Self::Get),
            "modify" => Some(Self::Modify),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Create => "create",
            Self::Get => "get",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }

    /// The OPTIONS method whose fields become this action's flags.
    pub fn schema_method(&self) -> Option<HttpMethod> {
        match self {
            Self::List => Some(HttpMethod::Get),
            Self::Create | Self::Modify => Some(HttpMethod::Post),
            Self::Get | Self::Delete => None,
        }
    }

    /// Whether the action addresses a single object by positional id.
    pub fn takes_id(&self) -> bool {
        matches!(self, Self::Get | Self::Modify | Self::Delete)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A foreign-key argument as typed: a primary key or a unique name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRef {
    /// Field or resource name the value refers to, e.g. `inventory`.
    pub model: String,
    pub raw: String,
}

impl IdRef {
    pub fn new(model: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            raw: raw.into(),
        }
    }

    /// The literal primary key, when the value is all digits.
    pub fn pk(&self) -> Option<i64> {
        if !self.raw.is_empty() && self.raw.bytes().all(|b| b.is_ascii_digit()) {
            self.raw.parse().ok()
        } else {
            None
        }
    }
}

/// How a raw command-line string becomes a payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    Text,
    Integer,
    Boolean,
    Id(String),
    Json,
    /// JSON or YAML re-serialized to a JSON string.
    JsonString,
    IntegerChoice(Vec<i64>),
    TextChoice(Vec<String>),
}

impl Coercion {
    fn for_field(name: &str, meta: &FieldMeta) -> Self {
        if let Some(first) = meta.choices.first() {
            if first.value.is_i64() || first.value.is_u64() {
                return Self::IntegerChoice(
                    meta.choices.iter().filter_map(|c| c.value.as_i64()).collect(),
                );
            }
            return Self::TextChoice(
                meta.choices
                    .iter()
                    .map(|c| crate::client::query_value(&c.value))
                    .collect(),
            );
        }
        match meta.field_type {
            FieldType::String => Self::Text,
            FieldType::Integer | FieldType::Field => Self::Integer,
            FieldType::Boolean => Self::Boolean,
            FieldType::Id => Self::Id(name.to_string()),
            FieldType::Json => Self::Json,
        }
    }

    /// Coerce one raw value. Choice membership is left to clap.
    pub fn coerce(&self, raw: &str) -> Result<Value> {
        match self {
            Self::Text | Self::TextChoice(_) => Ok(Value::String(raw.to_string())),
            Self::Integer | Self::IntegerChoice(_) => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| CliError::validation(format!("invalid int value: '{raw}'"))),
            Self::Boolean => strtobool(raw)
                .map(Value::Bool)
                .ok_or_else(|| CliError::validation(format!("invalid truth value '{raw}'"))),
            Self::Id(_) => Ok(Value::String(raw.to_string())),
            Self::Json => json_or_yaml(raw),
            Self::JsonString => Ok(Value::String(serde_json::to_string(&json_or_yaml(raw)?)?)),
        }
    }
}

/// One synthesized flag.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagSpec {
    pub name: String,
    pub coercion: Coercion,
    pub required: bool,
    pub help: String,
    pub metavar: String,
}

pub const REQUIRED_HEADING: &str = "required arguments";
pub const OPTIONAL_HEADING: &str = "optional arguments";

/// Fields the API requires on create although OPTIONS does not say so.
pub const REQUIRED_OVERRIDES: &[(&str, Action, &str)] = &[
    ("users", Action::Create, "password"),
    ("ad_hoc_commands", Action::Create, "inventory"),
    ("ad_hoc_commands", Action::Create, "credential"),
    ("job_templates", Action::Create, "project"),
    ("job_templates", Action::Create, "playbook"),
];

/// Fields whose payload is a JSON-encoded string rather than an object.
pub const JSON_STRING_FIELDS: &[(&str, &str)] = &[
    ("job_templates", "extra_vars"),
    ("workflow_job_templates", "extra_vars"),
    ("inventory", "variables"),
    ("groups", "variables"),
    ("hosts", "variables"),
];

/// Names clap or the global flags already own.
const RESERVED: &[&str] = &["help", "filter", "verbose", "all", "id"];

fn is_forced_required(resource: &str, action: Action, field: &str) -> bool {
    REQUIRED_OVERRIDES
        .iter()
        .any(|(r, a, f)| *r == resource && *a == action && *f == field)
}

fn is_json_string(resource: &str, field: &str) -> bool {
    JSON_STRING_FIELDS
        .iter()
        .any(|(r, f)| *r == resource && *f == field)
}

/// Build the flag set for `action` on `resource`.
///
/// Required flags come first. Actions without a schema method yield nothing.
pub fn build(schema: &OptionsSchema, action: Action, resource: &str) -> Vec<FlagSpec> {
    let Some(fields) = action.schema_method().and_then(|m| schema.fields(m)) else {
        return Vec::new();
    };

    let mut specs = Vec::new();
    for (name, meta) in fields {
        if RESERVED.contains(&name.as_str()) || name.starts_with("conf.") {
            continue;
        }
        if action == Action::List && (name == "id" || !meta.filterable) {
            continue;
        }

        let required = match action {
            Action::Create => meta.required || is_forced_required(resource, action, name),
            _ => false,
        };

        let coercion = if is_json_string(resource, name) {
            Coercion::JsonString
        } else {
            Coercion::for_field(name, meta)
        };

        let help = if action == Action::List {
            format!("only list {resource} with the specified {name}")
        } else if meta.field_type == FieldType::Id && meta.help_text.is_empty() {
            format!("the ID of the associated {name}")
        } else if matches!(coercion, Coercion::Json | Coercion::JsonString) {
            let base = meta.help_text.trim_end_matches('.');
            let note = "a JSON or YAML string. You can optionally specify a file path e.g., @path/to/file.yml";
            if base.is_empty() {
                note.to_string()
            } else {
                format!("{base}. {note}")
            }
        } else {
            meta.help_text.clone()
        };

        let metavar = match &coercion {
            Coercion::JsonString => FieldType::Json.metavar().to_string(),
            _ => meta.field_type.metavar().to_string(),
        };

        specs.push(FlagSpec {
            name: name.clone(),
            coercion,
            required,
            help,
            metavar,
        });
    }

    // stable: keeps field order within each group
    specs.sort_by_key(|s| !s.required);
    specs
}

impl FlagSpec {
    pub fn to_arg(&self) -> Arg {
        let arg = Arg::new(self.name.clone())
            .long(self.name.clone())
            .help(self.help.clone())
            .required(self.required)
            .action(ArgAction::Set)
            .help_heading(if self.required {
                REQUIRED_HEADING
            } else {
                OPTIONAL_HEADING
            });

        match &self.coercion {
            Coercion::TextChoice(choices) => arg.value_parser(
                PossibleValuesParser::new(choices.clone()).map(Value::String),
            ),
            Coercion::IntegerChoice(choices) => arg.value_parser(
                PossibleValuesParser::new(choices.iter().map(i64::to_string))
                    .try_map(|s| s.parse::<i64>().map(Value::from)),
            ),
            Coercion::Id(model) => arg.value_name(self.metavar.clone()).value_parser(id_ref(model)),
            other => {
                let coercion = other.clone();
                arg.value_name(self.metavar.clone()).value_parser(
                    move |s: &str| -> std::result::Result<Value, String> {
                        coercion.coerce(s).map_err(|e| e.to_string())
                    },
                )
            }
        }
    }
}

/// Add flags to a command, skipping ids it already defines.
pub fn attach(mut cmd: Command, specs: &[FlagSpec]) -> Command {
    for spec in specs {
        if cmd.get_arguments().any(|a| a.get_id() == spec.name.as_str()) {
            continue;
        }
        cmd = cmd.arg(spec.to_arg());
    }
    cmd
}

/// Value parser producing an `IdRef` to `model`.
pub fn id_ref(
    model: &str,
) -> impl Fn(&str) -> std::result::Result<IdRef, String> + Clone + Send + Sync + 'static {
    let model = model.to_string();
    move |s: &str| Ok(IdRef::new(model.clone(), s))
}

/// Positional `id` accepting a primary key or a unique name of `resource`.
pub fn id_arg(resource: &str) -> Arg {
    Arg::new("id")
        .help("the ID (or unique name) of the resource")
        .required(true)
        .value_parser(id_ref(resource))
}

/// Parse JSON, falling back to YAML; `@path` reads the value from a file.
///
/// The result must be an object. Top-level string values starting with `@`
/// are replaced by the contents of the named file.
pub fn json_or_yaml(raw: &str) -> Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => read_file(path)?,
        None => raw.to_string(),
    };

    let parsed: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => serde_yaml::from_str(&text).map_err(|_| CliError::InvalidJsonOrYaml {
            value: raw.to_string(),
        })?,
    };

    let Value::Object(mut obj) = parsed else {
        return Err(CliError::InvalidJsonOrYaml {
            value: raw.to_string(),
        });
    };

    for value in obj.values_mut() {
        let file = value
            .as_str()
            .and_then(|s| s.strip_prefix('@'))
            .map(str::to_string);
        if let Some(path) = file {
            *value = Value::String(read_file(&path)?);
        }
    }
    Ok(Value::Object(obj))
}

fn read_file(path: &str) -> Result<String> {
    let expanded = expand_home(path);
    std::fs::read_to_string(&expanded).map_err(|source| CliError::FileRead {
        path: path.to_string(),
        source,
    })
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs_next::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Truthy strings as in `y/yes/t/true/on/1` and their negatives.
pub fn strtobool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}
