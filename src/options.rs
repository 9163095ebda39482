//! HTTP OPTIONS → schema IR
//!
//! Parses the `actions` block of an OPTIONS response into per-method field
//! metadata the argument synthesizer consumes.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::client::Page;
use crate::error::Result;

/// HTTP methods an OPTIONS `actions` block may describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    /// Foreign key: accepts a primary key or a unique name.
    Id,
    Json,
    Field,
}

impl FieldType {
    /// Unknown type names fall back to `String`.
    pub fn parse(s: &str) -> Self {
        match s {
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "id" => Self::Id,
            "json" => Self::Json,
            "field" => Self::Field,
            _ => Self::String,
        }
    }

    pub fn metavar(&self) -> &'static str {
        match self {
            Self::String => "TEXT",
            Self::Integer | Self::Field => "INTEGER",
            Self::Boolean => "BOOLEAN",
            Self::Id => "ID",
            Self::Json => "JSON/YAML",
        }
    }
}

/// One allowed value of a choice field.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub value: Value,
    pub label: String,
}

/// Metadata for one field of one method.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMeta {
    pub field_type: FieldType,
    pub required: bool,
    pub choices: Vec<Choice>,
    pub help_text: String,
    pub filterable: bool,
}

impl FieldMeta {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            choices: Vec::new(),
            help_text: String::new(),
            filterable: true,
        }
    }
}

pub type Fields = BTreeMap<String, FieldMeta>;

/// What an endpoint's OPTIONS response says it supports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsSchema {
    pub methods: BTreeMap<HttpMethod, Fields>,
    /// Role names from `object_roles`, e.g. `admin_role`.
    pub object_roles: Vec<String>,
    pub deprecated: bool,
}

impl OptionsSchema {
    pub fn fields(&self, method: HttpMethod) -> Option<&Fields> {
        self.methods.get(&method)
    }

    pub fn supports(&self, method: HttpMethod) -> bool {
        self.methods.contains_key(&method)
    }

    /// Type of a field under any method, preferring POST.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        [HttpMethod::Post, HttpMethod::Put, HttpMethod::Get]
            .iter()
            .filter_map(|m| self.methods.get(m))
            .find_map(|fields| fields.get(name))
            .map(|meta| meta.field_type)
    }
}

/// Issue one OPTIONS request and parse it.
pub fn fetch(page: &Page<'_>) -> Result<OptionsSchema> {
    let resp = page.options()?;
    let mut schema = parse(&resp.json());
    schema.deprecated = resp.deprecated;
    debug!(
        endpoint = page.endpoint(),
        methods = ?schema.methods.keys().collect::<Vec<_>>(),
        "fetched options"
    );
    Ok(schema)
}

/// Methods the detail endpoint (`<endpoint>1/`) advertises in `Allow`.
///
/// `None` when the probe fails; callers then assume every detail action.
pub fn detail_methods(page: &Page<'_>) -> Option<Vec<HttpMethod>> {
    let probe = page.join(1);
    match page
        .connection()
        .request(reqwest::Method::OPTIONS, probe.endpoint(), &[], None)
    {
        Ok(resp) if resp.status.is_success() && !resp.allow.is_empty() => Some(
            resp.allow
                .iter()
                .filter_map(|m| HttpMethod::parse(m))
                .collect(),
        ),
        Ok(resp) => {
            debug!(endpoint = probe.endpoint(), status = %resp.status, "detail probe gave no Allow header");
            None
        }
        Err(e) => {
            debug!(endpoint = probe.endpoint(), error = %e, "detail probe failed");
            None
        }
    }
}

/// Parse an OPTIONS body. A body without `actions` is read-only (GET, no fields).
pub fn parse(body: &Value) -> OptionsSchema {
    let mut methods = BTreeMap::new();

    match body.get("actions").and_then(Value::as_object) {
        Some(actions) => {
            for (method, fields) in actions {
                let Some(method) = HttpMethod::parse(method) else {
                    continue;
                };
                methods.insert(method, parse_fields(fields));
            }
        }
        None => {
            methods.insert(HttpMethod::Get, Fields::new());
        }
    }

    let object_roles = body
        .get("object_roles")
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    OptionsSchema {
        methods,
        object_roles,
        deprecated: false,
    }
}

/// Parse the `{field: meta}` map of one method.
pub fn parse_fields(fields: &Value) -> Fields {
    fields
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(name, meta)| (name.clone(), parse_field(meta)))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_field(meta: &Value) -> FieldMeta {
    let field_type = meta
        .get("type")
        .and_then(Value::as_str)
        .map(FieldType::parse)
        .unwrap_or(FieldType::String);
    let required = meta
        .get("required")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let help_text = meta
        .get("help_text")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let filterable = meta
        .get("filterable")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let choices = meta
        .get("choices")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_choice).collect())
        .unwrap_or_default();

    FieldMeta {
        field_type,
        required,
        choices,
        help_text,
        filterable,
    }
}

/// Choices arrive as `[value, label]` pairs, occasionally as bare values.
fn parse_choice(choice: &Value) -> Option<Choice> {
    match choice {
        Value::Array(pair) => {
            let value = pair.first()?.clone();
            let label = pair
                .get(1)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| crate::client::query_value(&value));
            Some(Choice { value, label })
        }
        Value::Null => None,
        other => Some(Choice {
            value: other.clone(),
            label: crate::client::query_value(other),
        }),
    }
}
