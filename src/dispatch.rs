//! ArgMatches → HTTP request dispatch
//!
//! Takes parsed clap matches for one `<resource> <action>`, resolves named
//! references to primary keys, and either hands off to a registered custom
//! action or maps the action to its HTTP verb.

use clap::{ArgMatches, Command};
use serde_json::Value;
use tracing::debug;

use crate::arguments::{Action, IdRef};
use crate::client::{query_value, Connection, Query};
use crate::custom::{ActionContext, ActionRegistry, Kwargs};
use crate::error::{CliError, Result};
use crate::resources::{identity_field, ApiRoot};

/// What a dispatched command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    /// Raw text printed as-is (job stdout, notices).
    Text(String),
    /// Usage text printed instead of issuing a request.
    Help(String),
    /// HTTP 204 or nothing to report.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub body: Body,
    /// Exit status derived from a monitored job.
    pub rc: Option<i32>,
}

impl Response {
    pub fn json(value: Value) -> Self {
        Self {
            body: Body::Json(value),
            rc: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            body: Body::Text(text.into()),
            rc: None,
        }
    }

    pub fn help(text: impl Into<String>) -> Self {
        Self {
            body: Body::Help(text.into()),
            rc: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            body: Body::Empty,
            rc: None,
        }
    }

    /// `None` (no content) becomes an empty response.
    pub fn from_body(body: Option<Value>) -> Self {
        body.map(Self::json).unwrap_or_else(Self::empty)
    }

    pub fn with_rc(mut self, rc: Option<i32>) -> Self {
        self.rc = rc;
        self
    }
}

/// Global and formatting flags never sent to the API.
pub fn is_global_arg(id: &str) -> bool {
    id.starts_with("conf.") || matches!(id, "filter" | "verbose" | "help")
}

/// Split matches into payload values and still-unresolved references.
///
/// References appear in the kwargs under their raw text until resolved.
/// Switches contribute only when set.
pub fn collect_kwargs(matches: &ArgMatches) -> (Kwargs, Vec<(String, IdRef)>) {
    let mut kwargs = Kwargs::new();
    let mut refs = Vec::new();

    for id in matches.ids() {
        let name = id.as_str();
        if is_global_arg(name) {
            continue;
        }
        if let Ok(Some(value)) = matches.try_get_one::<Value>(name) {
            kwargs.insert(name.to_string(), value.clone());
        } else if let Ok(Some(r)) = matches.try_get_one::<IdRef>(name) {
            kwargs.insert(name.to_string(), Value::String(r.raw.clone()));
            refs.push((name.to_string(), r.clone()));
        } else if let Ok(Some(true)) = matches.try_get_one::<bool>(name).map(|v| v.copied()) {
            kwargs.insert(name.to_string(), Value::Bool(true));
        }
    }
    (kwargs, refs)
}

/// Resolve a primary key or unique name to an id.
///
/// Digits are taken as the primary key. Names are looked up with a
/// list filter on the model's identity field; exactly one match is
/// required. A model the API root does not know keeps the raw value.
pub fn resolve_ref(conn: &Connection, root: &ApiRoot, r: &IdRef) -> Result<Value> {
    if let Some(pk) = r.pk() {
        return Ok(Value::from(pk));
    }
    let Some(model) = root.model_for(&r.model) else {
        debug!(model = %r.model, "no collection for reference; sending as-is");
        return Ok(Value::String(r.raw.clone()));
    };
    let identity = identity_field(model);
    let Some(page) = root.page(conn, model) else {
        return Ok(Value::String(r.raw.clone()));
    };

    let found = page.get(&[(identity.to_string(), r.raw.clone())])?;
    let count = found.get("count").and_then(Value::as_u64).unwrap_or(0);
    match count {
        1 => found
            .pointer("/results/0/id")
            .cloned()
            .ok_or_else(|| CliError::validation(format!("{model} lookup returned no id"))),
        0 => Err(CliError::validation(format!(
            "Could not find any {model} with that {identity}."
        ))),
        _ => Err(CliError::validation(format!(
            "Multiple {model} exist with that {identity}. To look up an ID, run:\n\
             awx {model} list --{identity} \"{}\" -f human",
            r.raw
        ))),
    }
}

/// Render kwargs as list filters.
fn to_query(kwargs: &Kwargs) -> Query {
    kwargs
        .iter()
        .map(|(k, v)| (k.clone(), query_value(v)))
        .collect()
}

/// Execute one `<resource> <action>` from its parsed matches.
///
/// `help_cmd` is the action's subcommand, rendered when a `modify`
/// carries nothing to change.
pub fn dispatch(
    ctx: &mut ActionContext<'_>,
    registry: &ActionRegistry,
    resource: &str,
    action: &str,
    matches: &ArgMatches,
    help_cmd: &mut Command,
) -> Result<Response> {
    let (mut kwargs, refs) = collect_kwargs(matches);
    let collection = ctx
        .root
        .page(ctx.conn, resource)
        .ok_or_else(|| CliError::validation(format!("unknown resource: {resource}")))?;

    let custom = registry.create(resource, action, collection.clone());
    if let Some(custom) = &custom {
        custom.validate(&kwargs, ctx.roles)?;
    } else if action == Action::Modify.as_str() && kwargs.keys().all(|k| k == "id") {
        return Ok(Response::help(help_cmd.render_help().to_string()));
    }

    let mut page = collection;
    for (name, r) in &refs {
        let resolved = resolve_ref(ctx.conn, ctx.root, r)?;
        if name == "id" {
            kwargs.remove("id");
            page = page.join(query_value(&resolved));
        } else {
            kwargs.insert(name.clone(), resolved);
        }
    }
    debug!(resource, action, endpoint = page.endpoint(), "dispatching");

    let unknown = || CliError::validation(format!("unknown action: {resource} {action}"));
    if custom.is_some() {
        // re-created so it acts on the detail page
        let custom = registry.create(resource, action, page).ok_or_else(unknown)?;
        return custom.perform(kwargs, ctx);
    }

    let action = Action::parse(action).ok_or_else(unknown)?;
    match action {
        Action::List => {
            let all_pages = kwargs.remove("all_pages") == Some(Value::Bool(true));
            let query = to_query(&kwargs);
            let body = if all_pages {
                page.get_all(&query)?
            } else {
                page.get(&query)?
            };
            Ok(Response::json(body))
        }
        Action::Get => Ok(Response::json(page.get(&[])?)),
        Action::Create => Ok(Response::from_body(page.post(&Value::Object(kwargs))?)),
        Action::Modify => Ok(Response::from_body(page.patch(&Value::Object(kwargs))?)),
        Action::Delete => Ok(Response::from_body(page.delete()?)),
    }
}
