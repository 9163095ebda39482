//! Resource names, deprecated aliases and API root discovery.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::client::{Connection, Page};
use crate::error::{CliError, Result};

/// Canonical resource name → deprecated singular alias.
pub const DEPRECATED_RESOURCES: &[(&str, &str)] = &[
    ("ad_hoc_commands", "ad_hoc"),
    ("applications", "application"),
    ("credentials", "credential"),
    ("credential_types", "credential_type"),
    ("execution_environments", "execution_environment"),
    ("groups", "group"),
    ("hosts", "host"),
    ("instances", "instance"),
    ("instance_groups", "instance_group"),
    ("inventory", "inventories"),
    ("inventory_sources", "inventory_source"),
    ("inventory_updates", "inventory_update"),
    ("jobs", "job"),
    ("job_templates", "job_template"),
    ("labels", "label"),
    ("notification_templates", "notification_template"),
    ("organizations", "organization"),
    ("projects", "project"),
    ("project_updates", "project_update"),
    ("roles", "role"),
    ("schedules", "schedule"),
    ("settings", "setting"),
    ("teams", "team"),
    ("users", "user"),
    ("workflow_jobs", "workflow_job"),
    ("workflow_job_templates", "workflow"),
    ("workflow_job_template_nodes", "node"),
];

/// Singleton GET-only endpoints with no action grammar.
pub const CONTROL_RESOURCES: &[&str] = &["ping", "config", "me", "metrics", "mesh_visualizer"];

/// Root entries never offered as resources.
pub const DENYLIST: &[&str] = &["dashboard", "config"];

/// Resources `export` and `import` handle, in dependency order.
pub const EXPORTABLE_RESOURCES: &[&str] = &[
    "organizations",
    "users",
    "teams",
    "credential_types",
    "credentials",
    "execution_environments",
    "notification_templates",
    "projects",
    "inventory",
    "inventory_sources",
    "job_templates",
    "workflow_job_templates",
];

pub fn deprecated_alias(canonical: &str) -> Option<&'static str> {
    DEPRECATED_RESOURCES
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, alias)| *alias)
}

/// Reverse lookup: the canonical name behind a deprecated alias.
pub fn canonical_name(alias: &str) -> Option<&'static str> {
    DEPRECATED_RESOURCES
        .iter()
        .find(|(_, a)| *a == alias)
        .map(|(name, _)| *name)
}

/// Canonical form of a typed resource name.
pub fn resolve(name: &str) -> &str {
    canonical_name(name).unwrap_or(name)
}

pub fn is_control(name: &str) -> bool {
    CONTROL_RESOURCES.contains(&name)
}

/// Field that uniquely names objects of a resource.
pub fn identity_field(resource: &str) -> &'static str {
    match resource {
        "users" => "username",
        "instances" => "hostname",
        _ => "name",
    }
}

/// The versioned API root: resource name → collection endpoint.
#[derive(Debug, Clone, Default)]
pub struct ApiRoot {
    pub version: String,
    pub resources: BTreeMap<String, String>,
}

impl ApiRoot {
    /// `GET /api/` for the current version, then `GET` of that version root.
    pub fn discover(conn: &Connection) -> Result<Self> {
        let index = conn.get("/api/", &[])?.json();
        let version = index
            .get("current_version")
            .and_then(Value::as_str)
            .unwrap_or("/api/v2/")
            .to_string();
        let body = Page::new(conn, version.clone()).get(&[])?;
        let root = Self::from_body(version, &body)?;
        debug!(version = %root.version, resources = root.resources.len(), "discovered api root");
        Ok(root)
    }

    pub fn from_body(version: String, body: &Value) -> Result<Self> {
        let obj = body
            .as_object()
            .ok_or_else(|| CliError::validation(format!("unexpected API root at {version}")))?;
        let resources = obj
            .iter()
            .filter_map(|(name, v)| v.as_str().map(|ep| (name.clone(), ep.to_string())))
            .collect();
        Ok(Self { version, resources })
    }

    pub fn endpoint(&self, resource: &str) -> Option<&str> {
        self.resources.get(resolve(resource)).map(String::as_str)
    }

    /// Resource names offered on the command line, denylist removed.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources
            .keys()
            .map(String::as_str)
            .filter(|name| !DENYLIST.contains(name))
    }

    pub fn page<'a>(&self, conn: &'a Connection, resource: &str) -> Option<Page<'a>> {
        self.endpoint(resource).map(|ep| Page::new(conn, ep))
    }

    /// Resource a related-field name refers to: `organization` → `organizations`,
    /// `source_project` → `projects`.
    pub fn model_for(&self, field: &str) -> Option<&str> {
        let candidates = [
            field.to_string(),
            resolve(field).to_string(),
            format!("{field}s"),
        ];
        if let Some(hit) = candidates
            .iter()
            .find_map(|c| self.resources.get_key_value(c.as_str()))
        {
            return Some(hit.0.as_str());
        }
        // `source_project` → `project`
        let tail = field.rsplit('_').next()?;
        if tail == field {
            return None;
        }
        self.model_for(tail)
    }
}
