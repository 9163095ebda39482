//! Built-in commands that do not map onto an API resource:
//! `login`, `config`, `import` and `export`.

use std::io::Read;

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::arguments::IdRef;
use crate::client::{query_value, Auth, Connection};
use crate::config::Settings;
use crate::dispatch::{resolve_ref, Response};
use crate::error::{CliError, Result};
use crate::format::Format;
use crate::resources::{identity_field, ApiRoot, EXPORTABLE_RESOURCES};

pub const BUILTINS: &[&str] = &["login", "config", "import", "export"];

/// Fields export never writes: server-assigned or derived.
const SERVER_FIELDS: &[&str] = &["id", "url", "related", "summary_fields", "created", "modified"];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

// -- login --

pub fn login_command() -> Command {
    Command::new("login")
        .about("authenticate and retrieve an OAuth2 token")
        .arg(
            Arg::new("description")
                .long("description")
                .value_name("TEXT")
                .help("description of the generated OAuth2.0 token"),
        )
        .arg(
            Arg::new("conf.client_id")
                .long("conf.client_id")
                .value_name("TEXT"),
        )
        .arg(
            Arg::new("conf.client_secret")
                .long("conf.client_secret")
                .value_name("TEXT"),
        )
        .arg(
            Arg::new("conf.scope")
                .long("conf.scope")
                .value_parser(["read", "write"])
                .default_value("write"),
        )
}

/// Request a token with the configured username and password.
///
/// With an OAuth2 application (`--conf.client_id`) the password grant of
/// `/api/o/token/` is used; otherwise a personal token is created.
pub fn login(
    conn: &Connection,
    root: &ApiRoot,
    settings: &Settings,
    matches: &ArgMatches,
) -> Result<Response> {
    let arg = |id: &str| matches.get_one::<String>(id).cloned();
    let scope = arg("conf.scope").unwrap_or_else(|| "write".to_string());
    let basic = Auth::Basic {
        username: settings.username.clone(),
        password: settings.password.clone(),
    };

    let token = match arg("conf.client_id") {
        Some(client_id) => {
            let secret = arg("conf.client_secret");
            let mut form = vec![
                ("grant_type", "password"),
                ("username", settings.username.as_str()),
                ("password", settings.password.as_str()),
                ("scope", scope.as_str()),
            ];
            let auth = match &secret {
                Some(secret) => Auth::Basic {
                    username: client_id.clone(),
                    password: secret.clone(),
                },
                None => {
                    form.push(("client_id", client_id.as_str()));
                    Auth::None
                }
            };
            let resp = conn.post_form("/api/o/token/", &form, &auth)?.json();
            resp.get("access_token").map(query_value)
        }
        None => {
            let tokens = root
                .endpoint("tokens")
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}tokens/", root.version));
            let body = json!({
                "description": arg("description"),
                "application": null,
                "scope": scope,
            });
            let resp = conn.post_as(&tokens, &body, &basic)?.json();
            resp.get("token").map(query_value)
        }
    };

    let token = token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CliError::validation("the server did not return a token"))?;
    info!("issued a new token");

    if settings.format == Format::Human {
        Ok(Response::text(format!("export CONTROLLER_OAUTH_TOKEN={token}")))
    } else {
        Ok(Response::json(json!({ "token": token })))
    }
}

// -- config --

pub fn config_command() -> Command {
    Command::new("config").about("print current configuration values")
}

pub fn config(settings: &Settings) -> Response {
    Response::json(json!({
        "base_url": settings.host,
        "token": settings.token,
        "use_sessions": false,
        "credentials": {
            "default": {
                "username": settings.username,
                "password": settings.password,
            }
        }
    }))
}

// -- export --

pub fn export_command(root: &ApiRoot) -> Command {
    let mut cmd = Command::new("export").about("export resources as JSON or YAML");
    for resource in EXPORTABLE_RESOURCES {
        if root.endpoint(resource).is_none() {
            continue;
        }
        cmd = cmd.arg(
            Arg::new(*resource)
                .long(*resource)
                .value_name(identity_field(resource).to_uppercase())
                .num_args(0..)
                .action(ArgAction::Append)
                .help(format!(
                    "export {resource}; all of them unless names are given"
                )),
        );
    }
    cmd
}

fn require_data_format(format: Format, command: &str) -> Result<()> {
    match format {
        Format::Json | Format::Yaml => Ok(()),
        other => Err(CliError::validation(format!(
            "{command} only supports json and yaml formats, not {other}"
        ))),
    }
}

/// Export the selected resources, or every exportable one when none is named.
pub fn export(
    conn: &Connection,
    root: &ApiRoot,
    format: Format,
    matches: &ArgMatches,
) -> Result<Response> {
    require_data_format(format, "export")?;

    let available: Vec<&str> = EXPORTABLE_RESOURCES
        .iter()
        .copied()
        .filter(|r| root.endpoint(r).is_some())
        .collect();
    let mut selected: Vec<(&str, Vec<String>)> = available
        .iter()
        .filter(|r| matches.contains_id(r))
        .map(|r| {
            let names = matches
                .get_many::<String>(r)
                .map(|v| v.cloned().collect())
                .unwrap_or_default();
            (*r, names)
        })
        .collect();
    if selected.is_empty() {
        selected = available.iter().map(|r| (*r, Vec::new())).collect();
    }

    let mut out = Map::new();
    for (resource, names) in selected {
        let Some(page) = root.page(conn, resource) else {
            continue;
        };
        let records = if names.is_empty() {
            results(page.get_all(&[])?)
        } else {
            let identity = identity_field(resource);
            let mut found = Vec::new();
            for name in &names {
                found.extend(results(page.get(&[(identity.to_string(), name.clone())])?));
            }
            found
        };
        debug!(resource, count = records.len(), "exported");
        out.insert(
            resource.to_string(),
            Value::Array(records.iter().map(natural_record).collect()),
        );
    }
    Ok(Response::json(Value::Object(out)))
}

fn results(mut page: Value) -> Vec<Value> {
    match page.get_mut("results").map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Strip server fields and turn foreign keys into `{type, name}` references.
pub fn natural_record(record: &Value) -> Value {
    let Some(obj) = record.as_object() else {
        return record.clone();
    };
    let summary = obj.get("summary_fields").and_then(Value::as_object);

    let mut out = Map::new();
    for (key, value) in obj {
        if SERVER_FIELDS.contains(&key.as_str()) {
            continue;
        }
        let related_name = summary
            .and_then(|s| s.get(key))
            .filter(|_| value.is_i64() || value.is_u64())
            .and_then(|s| s.get("name").or_else(|| s.get("username")))
            .cloned();
        let value = match related_name {
            Some(name) => json!({"type": key, "name": name}),
            None => value.clone(),
        };
        out.insert(key.clone(), value);
    }
    Value::Object(out)
}

// -- import --

pub fn import_command() -> Command {
    Command::new("import").about("import resources from JSON or YAML read on stdin")
}

/// Parse and check an import document before anything is sent.
pub fn parse_import(text: &str) -> Result<Map<String, Value>> {
    let doc: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => serde_yaml::from_str(text)
            .map_err(|_| CliError::validation("import input is not valid JSON or YAML"))?,
    };
    let Value::Object(doc) = doc else {
        return Err(CliError::validation(
            "import input must map resource names to lists",
        ));
    };

    for (resource, records) in &doc {
        if !EXPORTABLE_RESOURCES.contains(&resource.as_str()) {
            return Err(CliError::validation(format!(
                "cannot import unknown resource: {resource}"
            )));
        }
        let Some(records) = records.as_array() else {
            return Err(CliError::validation(format!(
                "{resource} must be a list of objects"
            )));
        };
        let identity = identity_field(resource);
        for record in records {
            if record.get(identity).and_then(Value::as_str).is_none() {
                return Err(CliError::validation(format!(
                    "every {resource} entry needs a {identity}"
                )));
            }
        }
    }
    Ok(doc)
}

/// Create or update everything in the document read from `input`.
///
/// Resources are processed in dependency order. An existing object with
/// the same identity is patched; otherwise a new one is created.
pub fn import(conn: &Connection, root: &ApiRoot, input: &mut dyn Read) -> Result<Response> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;
    let doc = parse_import(&text)?;

    let mut summary = Map::new();
    for resource in EXPORTABLE_RESOURCES {
        let Some(records) = doc.get(*resource).and_then(Value::as_array) else {
            continue;
        };
        let page = root
            .page(conn, resource)
            .ok_or_else(|| CliError::validation(format!("the API has no {resource}")))?;
        let identity = identity_field(resource);
        let (mut created, mut updated) = (0, 0);

        for record in records {
            let payload = resolve_natural_keys(conn, root, record)?;
            let name = record.get(identity).map(query_value).unwrap_or_default();
            let existing = page.get(&[(identity.to_string(), name.clone())])?;
            match existing.pointer("/results/0/id") {
                Some(id) => {
                    page.join(query_value(id)).patch(&payload)?;
                    updated += 1;
                }
                None => {
                    page.post(&payload)?;
                    created += 1;
                }
            }
            debug!(resource, %name, "imported");
        }
        summary.insert(
            resource.to_string(),
            json!({"created": created, "updated": updated}),
        );
    }
    Ok(Response::json(Value::Object(summary)))
}

/// Replace `{type, name}` references with the ids they name.
fn resolve_natural_keys(conn: &Connection, root: &ApiRoot, record: &Value) -> Result<Value> {
    let Some(obj) = record.as_object() else {
        return Ok(record.clone());
    };
    let mut out = Map::new();
    for (key, value) in obj {
        let reference = value
            .get("type")
            .and_then(Value::as_str)
            .zip(value.get("name").and_then(Value::as_str));
        let value = match reference {
            Some((model, name)) => resolve_ref(conn, root, &IdRef::new(model, name))?,
            None => value.clone(),
        };
        out.insert(key.clone(), value);
    }
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use reqwest::blocking::Client;

    fn root() -> ApiRoot {
        ApiRoot::from_body(
            "/api/v2/".into(),
            &json!({
                "organizations": "/api/v2/organizations/",
                "projects": "/api/v2/projects/",
                "tokens": "/api/v2/tokens/"
            }),
        )
        .unwrap()
    }

    fn login_matches(argv: &[&str]) -> ArgMatches {
        login_command().try_get_matches_from(argv).unwrap()
    }

    #[test]
    fn login_creates_personal_token_with_basic_auth() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/v2/tokens/")
            .match_header("authorization", "Basic YWRtaW46c2VjcmV0")
            .match_body(Matcher::Json(json!({
                "description": "ci",
                "application": null,
                "scope": "write"
            })))
            .with_status(201)
            .with_body(r#"{"token":"abc123"}"#)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let settings = Settings {
            password: "secret".into(),
            format: Format::Human,
            ..Settings::default()
        };
        let resp = login(
            &conn,
            &root(),
            &settings,
            &login_matches(&["login", "--description", "ci"]),
        )
        .unwrap();
        assert_eq!(resp, Response::text("export CONTROLLER_OAUTH_TOKEN=abc123"));
        mock.assert();
    }

    #[test]
    fn login_with_application_uses_password_grant() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/o/token/")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "password".into()),
                Matcher::UrlEncoded("scope".into(), "read".into()),
                Matcher::UrlEncoded("client_id".into(), "app".into()),
            ]))
            .with_status(201)
            .with_body(r#"{"access_token":"xyz"}"#)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let resp = login(
            &conn,
            &root(),
            &Settings::default(),
            &login_matches(&["login", "--conf.client_id", "app", "--conf.scope", "read"]),
        )
        .unwrap();
        assert_eq!(resp, Response::json(json!({"token": "xyz"})));
        mock.assert();
    }

    #[test]
    fn config_reports_effective_settings() {
        let settings = Settings {
            host: "https://awx.example.com".into(),
            token: Some("t".into()),
            ..Settings::default()
        };
        assert_eq!(
            config(&settings),
            Response::json(json!({
                "base_url": "https://awx.example.com",
                "token": "t",
                "use_sessions": false,
                "credentials": {"default": {"username": "admin", "password": "password"}}
            }))
        );
    }

    #[test]
    fn natural_record_strips_server_fields_and_names_foreign_keys() {
        let record = json!({
            "id": 3,
            "url": "/api/v2/projects/3/",
            "related": {},
            "created": "2024-01-01",
            "name": "demo",
            "organization": 1,
            "summary_fields": {"organization": {"id": 1, "name": "Default"}}
        });
        assert_eq!(
            natural_record(&record),
            json!({
                "name": "demo",
                "organization": {"type": "organization", "name": "Default"}
            })
        );
    }

    #[test]
    fn export_rejects_table_formats() {
        let conn = Connection::with_client(Client::new(), "http://127.0.0.1:1");
        let root = root();
        let m = export_command(&root).try_get_matches_from(["export"]).unwrap();
        let err = export(&conn, &root, Format::Human, &m).unwrap_err();
        assert!(matches!(err, CliError::Validation(_)));
    }

    #[test]
    fn export_selected_resource_by_name() {
        let mut server = mockito::Server::new();
        let _orgs = server
            .mock("GET", "/api/v2/organizations/")
            .match_query(Matcher::UrlEncoded("name".into(), "Ops".into()))
            .with_status(200)
            .with_body(r#"{"count":1,"results":[{"id":2,"name":"Ops","description":""}]}"#)
            .create();
        let projects = server
            .mock("GET", Matcher::Regex("^/api/v2/projects/".into()))
            .expect(0)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let root = root();
        let m = export_command(&root)
            .try_get_matches_from(["export", "--organizations", "Ops"])
            .unwrap();
        let resp = export(&conn, &root, Format::Json, &m).unwrap();
        assert_eq!(
            resp,
            Response::json(json!({"organizations": [{"name": "Ops", "description": ""}]}))
        );
        projects.assert();
    }

    #[test]
    fn parse_import_validates_before_any_request() {
        assert!(parse_import("organizations: [{name: Ops}]").is_ok());
        assert!(parse_import("[1, 2]").is_err());
        assert!(parse_import(r#"{"widgets": []}"#).is_err());
        assert!(parse_import(r#"{"organizations": {"name": "Ops"}}"#).is_err());
        assert!(parse_import(r#"{"organizations": [{"description": "x"}]}"#).is_err());
    }

    #[test]
    fn import_patches_existing_and_creates_new() {
        let mut server = mockito::Server::new();
        let _ops = server
            .mock("GET", "/api/v2/organizations/")
            .match_query(Matcher::UrlEncoded("name".into(), "Ops".into()))
            .with_status(200)
            .with_body(r#"{"count":1,"results":[{"id":2}]}"#)
            .create();
        let patch = server
            .mock("PATCH", "/api/v2/organizations/2/")
            .with_status(200)
            .with_body(r#"{"id":2}"#)
            .create();
        let _project_lookup = server
            .mock("GET", "/api/v2/projects/")
            .match_query(Matcher::UrlEncoded("name".into(), "demo".into()))
            .with_status(200)
            .with_body(r#"{"count":0,"results":[]}"#)
            .create();
        let post = server
            .mock("POST", "/api/v2/projects/")
            .match_body(Matcher::Json(json!({"name": "demo", "organization": 2})))
            .with_status(201)
            .with_body(r#"{"id":7}"#)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let input = r#"{
            "projects": [{"name": "demo", "organization": {"type": "organization", "name": "Ops"}}],
            "organizations": [{"name": "Ops", "description": "ops team"}]
        }"#;
        let resp = import(&conn, &root(), &mut input.as_bytes()).unwrap();
        assert_eq!(
            resp,
            Response::json(json!({
                "organizations": {"created": 0, "updated": 1},
                "projects": {"created": 1, "updated": 0}
            }))
        );
        patch.assert();
        post.assert();
    }
}
