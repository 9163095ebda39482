//! Custom actions
//!
//! Non-CRUD operations (launch, update, stdout, monitor, associate,
//! grant/revoke, settings) registered under `"<resource> <action>"`. A
//! registered action replaces the generic verb mapping for that pair.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::time::Duration;

use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::{Arg, ArgAction, ArgGroup, Command};
use indexmap::IndexMap;
use once_cell::unsync::OnceCell;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::arguments::{self, id_arg, id_ref, Action};
use crate::client::{query_value, related_page, Connection, Page};
use crate::dispatch::Response;
use crate::error::{CliError, Result};
use crate::monitor::{monitor, MonitorOptions};
use crate::options;
use crate::resources::ApiRoot;

/// Resolved flag values handed to `perform`.
pub type Kwargs = serde_json::Map<String, Value>;

/// Everything `perform` may touch besides its own page.
pub struct ActionContext<'a> {
    pub conn: &'a Connection,
    pub root: &'a ApiRoot,
    pub roles: &'a RoleCache<'a>,
    /// Colored output is enabled; selects ANSI stdout downloads.
    pub color: bool,
    /// Streamed job output goes here.
    pub out: &'a mut dyn Write,
}

pub trait CustomAction {
    fn about(&self) -> String {
        String::new()
    }

    /// Add this action's flags to its subcommand.
    fn add_arguments(&self, cmd: Command, _roles: &RoleCache<'_>) -> Result<Command> {
        Ok(cmd)
    }

    /// Checks that need no network access, run before name lookups.
    fn validate(&self, _kwargs: &Kwargs, _roles: &RoleCache<'_>) -> Result<()> {
        Ok(())
    }

    fn perform(&self, kwargs: Kwargs, ctx: &mut ActionContext<'_>) -> Result<Response>;
}

pub type Constructor =
    for<'a> fn(&'static str, &'static str, Page<'a>) -> Box<dyn CustomAction + 'a>;

/// Ordered `"<resource> <action>"` → constructor table.
#[derive(Clone)]
pub struct ActionRegistry {
    entries: IndexMap<String, (&'static str, &'static str, Constructor)>,
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

impl ActionRegistry {
    pub fn empty() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Register a constructor. A second registration for the same pair is refused.
    pub fn register(
        &mut self,
        resource: &'static str,
        action: &'static str,
        ctor: Constructor,
    ) -> bool {
        let key = format!("{resource} {action}");
        if self.entries.contains_key(&key) {
            warn!(%key, "custom action already registered; keeping the first");
            return false;
        }
        self.entries.insert(key, (resource, action, ctor));
        true
    }

    pub fn contains(&self, resource: &str, action: &str) -> bool {
        self.entries.contains_key(&format!("{resource} {action}"))
    }

    pub fn create<'a>(
        &self,
        resource: &str,
        action: &str,
        page: Page<'a>,
    ) -> Option<Box<dyn CustomAction + 'a>> {
        self.entries
            .get(&format!("{resource} {action}"))
            .map(|(r, a, ctor)| ctor(*r, *a, page))
    }

    /// Custom action names registered for `resource`, in registration order.
    pub fn actions<'s>(&'s self, resource: &'s str) -> impl Iterator<Item = &'static str> + 's {
        self.entries
            .values()
            .filter(move |(r, _, _)| *r == resource)
            .map(|(_, a, _)| *a)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut reg = Self::empty();
        reg.register("job_templates", "launch", launchable);
        reg.register("workflow_job_templates", "launch", launchable);
        reg.register("projects", "update", launchable);
        reg.register("inventory_sources", "update", launchable);
        reg.register("ad_hoc_commands", "create", launchable);
        reg.register("projects", "create", project_create);

        for resource in ["jobs", "project_updates", "inventory_updates", "ad_hoc_commands"] {
            reg.register(resource, "stdout", has_stdout);
        }
        for resource in ["jobs", "workflow_jobs"] {
            reg.register(resource, "monitor", has_monitor);
        }
        for (resource, _) in ASSOCIATIONS {
            reg.register(*resource, "associate", association);
            reg.register(*resource, "disassociate", association);
        }
        for resource in ["users", "teams"] {
            reg.register(resource, "grant", role_action);
            reg.register(resource, "revoke", role_action);
        }
        reg.register("settings", "list", settings_list);
        reg.register("settings", "modify", settings_modify);
        reg
    }
}

fn launchable<'a>(
    resource: &'static str,
    action: &'static str,
    page: Page<'a>,
) -> Box<dyn CustomAction + 'a> {
    Box::new(Launchable {
        resource,
        action,
        page,
    })
}

fn project_create<'a>(
    resource: &'static str,
    _action: &'static str,
    page: Page<'a>,
) -> Box<dyn CustomAction + 'a> {
    Box::new(ProjectCreate { resource, page })
}

fn has_stdout<'a>(
    resource: &'static str,
    _action: &'static str,
    page: Page<'a>,
) -> Box<dyn CustomAction + 'a> {
    Box::new(HasStdout { resource, page })
}

fn has_monitor<'a>(
    resource: &'static str,
    _action: &'static str,
    page: Page<'a>,
) -> Box<dyn CustomAction + 'a> {
    Box::new(HasMonitor { resource, page })
}

fn association<'a>(
    resource: &'static str,
    action: &'static str,
    page: Page<'a>,
) -> Box<dyn CustomAction + 'a> {
    Box::new(Association {
        resource,
        action,
        page,
    })
}

fn role_action<'a>(
    resource: &'static str,
    action: &'static str,
    page: Page<'a>,
) -> Box<dyn CustomAction + 'a> {
    Box::new(RoleAction {
        resource,
        action,
        page,
    })
}

fn settings_list<'a>(
    _resource: &'static str,
    _action: &'static str,
    page: Page<'a>,
) -> Box<dyn CustomAction + 'a> {
    Box::new(SettingsList { page })
}

fn settings_modify<'a>(
    _resource: &'static str,
    _action: &'static str,
    page: Page<'a>,
) -> Box<dyn CustomAction + 'a> {
    Box::new(SettingsModify { page })
}

// -- launch / update --

fn with_monitor_flags(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("monitor")
            .long("monitor")
            .action(ArgAction::SetTrue)
            .help("If set, prints stdout of the launched job until it finishes."),
    )
    .arg(
        Arg::new("wait")
            .long("wait")
            .action(ArgAction::SetTrue)
            .help("If set, waits until the launched job finishes."),
    )
    .arg(
        Arg::new("action_timeout")
            .long("action-timeout")
            .value_name("INTEGER")
            .value_parser(|s: &str| -> std::result::Result<Value, String> {
                s.parse::<u64>()
                    .map(Value::from)
                    .map_err(|_| format!("invalid int value: '{s}'"))
            })
            .help("If set with --monitor or --wait, time out waiting on job completion."),
    )
    .arg(
        Arg::new("interval")
            .long("interval")
            .value_name("FLOAT")
            .value_parser(|s: &str| -> std::result::Result<Value, String> {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(Value::from)
                    .ok_or_else(|| format!("invalid float value: '{s}'"))
            })
            .help("If set with --monitor or --wait, seconds to wait between api calls."),
    )
}

/// Remove the monitoring flags; `Some` when `--monitor` or `--wait` was given.
fn take_monitor_options(kwargs: &mut Kwargs) -> Option<MonitorOptions> {
    let flag = |v: Option<Value>| v == Some(Value::Bool(true));
    let watch = flag(kwargs.remove("monitor"));
    let wait = flag(kwargs.remove("wait"));
    let timeout = kwargs
        .remove("action_timeout")
        .and_then(|v| v.as_u64())
        .filter(|t| *t > 0)
        .map(Duration::from_secs);
    let interval = kwargs
        .remove("interval")
        .and_then(|v| v.as_f64())
        .map(Duration::from_secs_f64);

    if !watch && !wait {
        return None;
    }
    let mut opts = MonitorOptions {
        print_stdout: !wait,
        timeout,
        ..MonitorOptions::default()
    };
    if let Some(interval) = interval {
        opts.interval = interval;
    }
    Some(opts)
}

/// Monitor the job a launch returned, folding its final status into the body.
fn follow_job(
    job: Option<Value>,
    opts: Option<MonitorOptions>,
    ctx: &mut ActionContext<'_>,
) -> Result<Response> {
    let Some(mut job) = job else {
        return Ok(Response::empty());
    };
    let Some(opts) = opts else {
        return Ok(Response::json(job));
    };

    let mut rc = None;
    if let Some(status) = monitor(ctx.conn, &job, &opts, ctx.out)? {
        if matches!(status.as_str(), "failed" | "error") {
            rc = Some(1);
        }
        if let Some(obj) = job.as_object_mut() {
            obj.insert("status".to_string(), Value::String(status));
        }
    }
    Ok(Response::json(job).with_rc(rc))
}

/// Starts a job: template launches, project and inventory source updates,
/// ad hoc commands.
struct Launchable<'a> {
    resource: &'static str,
    action: &'static str,
    page: Page<'a>,
}

impl Launchable<'_> {
    /// Ad hoc commands are created on the collection; everything else
    /// launches from an existing object.
    fn with_pk(&self) -> bool {
        self.action != "create"
    }

    /// Fields the launch endpoint accepts, probed on `<endpoint>1/<action>/`.
    fn launch_flags(&self) -> Vec<arguments::FlagSpec> {
        let probe = self.page.join(1).join(self.action);
        match probe.options() {
            Ok(resp) => {
                // launch-time fields are optional overrides, like modify
                arguments::build(&options::parse(&resp.json()), Action::Modify, self.resource)
            }
            Err(e) => {
                debug!(endpoint = probe.endpoint(), error = %e, "launch options probe failed");
                Vec::new()
            }
        }
    }
}

impl CustomAction for Launchable<'_> {
    fn about(&self) -> String {
        format!("{} a {}", self.action, self.resource.trim_end_matches('s'))
    }

    fn add_arguments(&self, mut cmd: Command, _roles: &RoleCache<'_>) -> Result<Command> {
        if self.with_pk() {
            cmd = cmd.arg(id_arg(self.resource));
        }
        cmd = with_monitor_flags(cmd);
        if self.with_pk() {
            cmd = arguments::attach(cmd, &self.launch_flags());
        }
        Ok(cmd)
    }

    fn perform(&self, mut kwargs: Kwargs, ctx: &mut ActionContext<'_>) -> Result<Response> {
        let opts = take_monitor_options(&mut kwargs);
        let payload = Value::Object(kwargs);
        let job = if self.with_pk() {
            let detail = self.page.get(&[])?;
            related_page(&self.page, &detail, self.action).post(&payload)?
        } else {
            self.page.post(&payload)?
        };
        follow_job(job, opts, ctx)
    }
}

/// `projects create` that can follow the initial project update.
struct ProjectCreate<'a> {
    resource: &'static str,
    page: Page<'a>,
}

impl CustomAction for ProjectCreate<'_> {
    fn about(&self) -> String {
        format!("create a {}", self.resource.trim_end_matches('s'))
    }

    fn add_arguments(&self, cmd: Command, _roles: &RoleCache<'_>) -> Result<Command> {
        Ok(with_monitor_flags(cmd))
    }

    fn perform(&self, mut kwargs: Kwargs, ctx: &mut ActionContext<'_>) -> Result<Response> {
        let opts = take_monitor_options(&mut kwargs);
        let created = self.page.post(&Value::Object(kwargs))?;
        let Some(created) = created else {
            return Ok(Response::empty());
        };

        if let Some(opts) = opts {
            let updates = related_page(&self.page, &created, "project_updates");
            let latest = updates.get(&[("order_by".to_string(), "-created".to_string())])?;
            match latest.get("results").and_then(|r| r.get(0)) {
                Some(update) => {
                    monitor(ctx.conn, update, &opts, ctx.out)?;
                }
                None => debug!("project created without an update to follow"),
            }
        }
        Ok(Response::json(created))
    }
}

// -- stdout / monitor --

/// Fetch a finished (or running) job's output as text.
struct HasStdout<'a> {
    resource: &'static str,
    page: Page<'a>,
}

impl CustomAction for HasStdout<'_> {
    fn about(&self) -> String {
        "print stdout".to_string()
    }

    fn add_arguments(&self, cmd: Command, _roles: &RoleCache<'_>) -> Result<Command> {
        Ok(cmd.arg(id_arg(self.resource)))
    }

    fn perform(&self, _kwargs: Kwargs, ctx: &mut ActionContext<'_>) -> Result<Response> {
        let detail = self.page.get(&[])?;
        let stdout = related_page(&self.page, &detail, "stdout");
        let fmt = if ctx.color {
            "ansi_download"
        } else {
            "txt_download"
        };
        let resp = ctx
            .conn
            .get(stdout.endpoint(), &[("format".to_string(), fmt.to_string())])?;
        Ok(Response::text(resp.text))
    }
}

/// Attach to a running job and stream it until it finishes.
struct HasMonitor<'a> {
    resource: &'static str,
    page: Page<'a>,
}

impl CustomAction for HasMonitor<'_> {
    fn about(&self) -> String {
        "watch a running job".to_string()
    }

    fn add_arguments(&self, cmd: Command, _roles: &RoleCache<'_>) -> Result<Command> {
        Ok(cmd.arg(id_arg(self.resource)))
    }

    fn perform(&self, _kwargs: Kwargs, ctx: &mut ActionContext<'_>) -> Result<Response> {
        let mut job = self.page.get(&[])?;
        let failed = job.get("failed") == Some(&Value::Bool(true));
        let status = job.get("status").and_then(Value::as_str);
        if failed || status == Some("successful") {
            return Ok(Response::text("Unable to monitor finished job"));
        }

        if job.get("url").is_none() {
            if let Some(obj) = job.as_object_mut() {
                obj.insert("url".to_string(), Value::String(self.page.endpoint().to_string()));
            }
        }
        follow_job(Some(job), Some(MonitorOptions::default()), ctx)
    }
}

// -- associate / disassociate --

/// One `--<flag>` of an associate/disassociate action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub flag: &'static str,
    /// Related collection on the acting object.
    pub endpoint: &'static str,
    /// What the flag's value names.
    pub model: &'static str,
}

const fn target(flag: &'static str, endpoint: &'static str, model: &'static str) -> Target {
    Target {
        flag,
        endpoint,
        model,
    }
}

const START: Target = target(
    "start_notification",
    "notification_templates_started",
    "notification_templates",
);
const SUCCESS: Target = target(
    "success_notification",
    "notification_templates_success",
    "notification_templates",
);
const FAILURE: Target = target(
    "failure_notification",
    "notification_templates_error",
    "notification_templates",
);
const APPROVAL: Target = target(
    "approval_notification",
    "notification_templates_approvals",
    "notification_templates",
);
const CREDENTIAL: Target = target("credential", "credentials", "credentials");
const GALAXY_CREDENTIAL: Target = target("galaxy_credential", "galaxy_credentials", "credentials");
const LABEL: Target = target("label", "labels", "labels");
const INSTANCE_GROUP: Target = target("instance_group", "instance_groups", "instance_groups");

/// Many-to-many links each resource can make.
///
/// The table is fixed rather than discovered from `related`: a resource
/// missing here gets no `associate`/`disassociate` actions, even if the API
/// exposes related collections for it.
pub const ASSOCIATIONS: &[(&str, &[Target])] = &[
    (
        "job_templates",
        &[START, SUCCESS, FAILURE, CREDENTIAL, LABEL, INSTANCE_GROUP],
    ),
    (
        "workflow_job_templates",
        &[START, SUCCESS, FAILURE, APPROVAL, LABEL],
    ),
    ("projects", &[START, SUCCESS, FAILURE]),
    ("inventory_sources", &[START, SUCCESS, FAILURE, CREDENTIAL]),
    (
        "organizations",
        &[
            START,
            SUCCESS,
            FAILURE,
            APPROVAL,
            GALAXY_CREDENTIAL,
            INSTANCE_GROUP,
        ],
    ),
    ("inventory", &[INSTANCE_GROUP]),
    (
        "groups",
        &[
            target("host", "hosts", "hosts"),
            target("child", "children", "groups"),
        ],
    ),
    ("hosts", &[target("group", "groups", "groups")]),
    ("instance_groups", &[target("instance", "instances", "instances")]),
];

pub fn association_targets(resource: &str) -> &'static [Target] {
    ASSOCIATIONS
        .iter()
        .find(|(r, _)| *r == resource)
        .map(|(_, t)| *t)
        .unwrap_or(&[])
}

struct Association<'a> {
    resource: &'static str,
    action: &'static str,
    page: Page<'a>,
}

impl CustomAction for Association<'_> {
    fn about(&self) -> String {
        format!("{} related objects", self.action)
    }

    fn add_arguments(&self, mut cmd: Command, _roles: &RoleCache<'_>) -> Result<Command> {
        cmd = cmd.arg(id_arg(self.resource).help(format!(
            "The ID (or name) of the {} to {}",
            self.resource, self.action
        )));
        let targets = association_targets(self.resource);
        for t in targets {
            cmd = cmd.arg(
                Arg::new(t.flag)
                    .long(t.flag)
                    .value_name("ID")
                    .value_parser(id_ref(t.model))
                    .help(format!("The ID (or name) of the {} to {}", t.model, self.action)),
            );
        }
        Ok(cmd.group(
            ArgGroup::new("target")
                .args(targets.iter().map(|t| t.flag))
                .required(true)
                .multiple(false),
        ))
    }

    fn perform(&self, kwargs: Kwargs, _ctx: &mut ActionContext<'_>) -> Result<Response> {
        let detail = self.page.get(&[])?;
        for t in association_targets(self.resource) {
            let Some(id) = kwargs.get(t.flag) else {
                continue;
            };
            let related = related_page(&self.page, &detail, t.endpoint);
            // 204 No Content is the success signal
            related.post(&json!({"id": id, self.action: true}))?;
            return Ok(Response::json(related.get(&[])?));
        }
        Err(CliError::validation(format!(
            "nothing to {}: pass one of the target flags",
            self.action
        )))
    }
}

// -- grant / revoke --

/// Resources carrying object roles, with the flag that targets them.
pub const HAS_ROLES: &[(&str, &str)] = &[
    ("organizations", "organization"),
    ("projects", "project"),
    ("inventory", "inventory"),
    ("teams", "team"),
    ("credentials", "credential"),
    ("job_templates", "job_template"),
    ("workflow_job_templates", "workflow_job_template"),
    ("instance_groups", "instance_group"),
];

/// Role names per target flag, loaded once from OPTIONS `object_roles`.
pub struct RoleCache<'a> {
    conn: &'a Connection,
    root: &'a ApiRoot,
    roles: OnceCell<BTreeMap<&'static str, Vec<String>>>,
}

impl<'a> RoleCache<'a> {
    pub fn new(conn: &'a Connection, root: &'a ApiRoot) -> Self {
        Self {
            conn,
            root,
            roles: OnceCell::new(),
        }
    }

    /// Pre-filled cache that never touches the network.
    pub fn with_roles(
        conn: &'a Connection,
        root: &'a ApiRoot,
        roles: BTreeMap<&'static str, Vec<String>>,
    ) -> Self {
        Self {
            conn,
            root,
            roles: OnceCell::with_value(roles),
        }
    }

    pub fn get(&self) -> &BTreeMap<&'static str, Vec<String>> {
        self.roles.get_or_init(|| self.load())
    }

    /// A resource whose OPTIONS fails contributes no roles.
    fn load(&self) -> BTreeMap<&'static str, Vec<String>> {
        let mut roles = BTreeMap::new();
        for (resource, flag) in HAS_ROLES {
            let Some(page) = self.root.page(self.conn, resource) else {
                continue;
            };
            match options::fetch(&page) {
                Ok(schema) => {
                    let names = schema
                        .object_roles
                        .iter()
                        .map(|r| r.trim_end_matches("_role").to_string())
                        .collect();
                    roles.insert(*flag, names);
                }
                Err(e) => debug!(resource, error = %e, "role lookup failed"),
            }
        }
        roles
    }

    /// Every role name any target type offers.
    pub fn all(&self) -> BTreeSet<String> {
        self.get().values().flatten().cloned().collect()
    }
}

struct RoleAction<'a> {
    resource: &'static str,
    action: &'static str,
    page: Page<'a>,
}

impl RoleAction<'_> {
    /// Target flags offered; a team is never added to a team.
    fn flags(&self, roles: &RoleCache<'_>) -> Vec<&'static str> {
        let known = roles.get();
        HAS_ROLES
            .iter()
            .map(|(_, flag)| *flag)
            .filter(|flag| known.contains_key(flag))
            .filter(|flag| !(self.resource == "teams" && *flag == "team"))
            .collect()
    }
}

impl CustomAction for RoleAction<'_> {
    fn about(&self) -> String {
        format!("{} access", self.action)
    }

    fn add_arguments(&self, mut cmd: Command, roles: &RoleCache<'_>) -> Result<Command> {
        let verb = if self.action == "grant" { "to" } else { "from" };
        cmd = cmd.arg(id_arg(self.resource).help(format!(
            "The ID (or name) of the {} to {} access {verb}",
            self.resource, self.action
        )));

        let possible: Vec<String> = roles.all().into_iter().collect();
        let role = Arg::new("role")
            .long("role")
            .required(true)
            .help(format!("The role to {}", self.action));
        let role = if possible.is_empty() {
            role.value_parser(|s: &str| -> std::result::Result<Value, String> {
                Ok(Value::String(s.to_string()))
            })
        } else {
            role.value_parser(PossibleValuesParser::new(possible).map(Value::String))
        };
        cmd = cmd.arg(role);

        for flag in self.flags(roles) {
            cmd = cmd.arg(
                Arg::new(flag)
                    .long(flag)
                    .value_name("ID")
                    .value_parser(id_ref(flag))
                    .help(format!("The ID (or name) of the target {flag}")),
            );
        }
        Ok(cmd)
    }

    fn validate(&self, kwargs: &Kwargs, roles: &RoleCache<'_>) -> Result<()> {
        let role = kwargs.get("role").map(query_value).unwrap_or_default();
        let mut targeted = false;
        for (_, flag) in HAS_ROLES {
            if !kwargs.contains_key(*flag) {
                continue;
            }
            targeted = true;
            let valid = roles.get().get(flag).cloned().unwrap_or_default();
            if !valid.contains(&role) {
                return Err(CliError::validation(format!(
                    "invalid choice: '{role}' must be one of {}",
                    valid.join(", ")
                )));
            }
        }
        if !targeted {
            return Err(CliError::validation(format!(
                "{} requires a target, e.g. --organization",
                self.action
            )));
        }
        Ok(())
    }

    fn perform(&self, kwargs: Kwargs, ctx: &mut ActionContext<'_>) -> Result<Response> {
        self.validate(&kwargs, ctx.roles)?;
        let role = kwargs.get("role").map(query_value).unwrap_or_default();
        let key = if self.action == "grant" {
            "associate"
        } else {
            "disassociate"
        };

        for (resource, flag) in HAS_ROLES {
            let Some(target) = kwargs.get(*flag) else {
                continue;
            };
            let endpoint = ctx
                .root
                .endpoint(resource)
                .ok_or_else(|| CliError::validation(format!("unknown resource {resource}")))?;
            let detail = Page::new(ctx.conn, endpoint).join(query_value(target)).get(&[])?;
            let role_id = detail
                .pointer(&format!("/summary_fields/object_roles/{role}_role/id"))
                .cloned()
                .ok_or_else(|| {
                    CliError::validation(format!("{flag} {} has no {role} role", query_value(target)))
                })?;
            self.page
                .related("roles")?
                .post(&json!({"id": role_id, key: true}))?;
        }
        Ok(Response::empty())
    }
}

// -- settings --

/// `settings list [--slug SLUG]`: one GET of `settings/<slug>/`.
struct SettingsList<'a> {
    page: Page<'a>,
}

impl CustomAction for SettingsList<'_> {
    fn about(&self) -> String {
        "list settings".to_string()
    }

    fn add_arguments(&self, cmd: Command, _roles: &RoleCache<'_>) -> Result<Command> {
        Ok(cmd.arg(
            Arg::new("slug")
                .long("slug")
                .default_value("all")
                .value_parser(|s: &str| -> std::result::Result<Value, String> {
                    Ok(Value::String(s.to_string()))
                })
                .help("optional setting category/slug"),
        ))
    }

    fn perform(&self, kwargs: Kwargs, _ctx: &mut ActionContext<'_>) -> Result<Response> {
        let slug = kwargs
            .get("slug")
            .map(query_value)
            .unwrap_or_else(|| "all".to_string());
        let page = self.page.join(urlencoding::encode(&slug));
        Ok(Response::json(page.get(&[])?))
    }
}

/// `settings modify KEY VALUE`: PATCH one setting on `settings/all/`.
struct SettingsModify<'a> {
    page: Page<'a>,
}

impl SettingsModify<'_> {
    /// Keys `settings/all/` accepts on PUT; empty when the probe fails.
    fn keys(&self) -> Vec<String> {
        let all = self.page.join("all");
        match options::fetch(&all) {
            Ok(schema) => schema
                .fields(options::HttpMethod::Put)
                .map(|f| f.keys().cloned().collect())
                .unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, "settings options probe failed");
                Vec::new()
            }
        }
    }
}

/// Parse `value` as JSON when it is valid JSON, else keep it as a string.
pub fn setting_value(value: &str) -> Value {
    serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

impl CustomAction for SettingsModify<'_> {
    fn about(&self) -> String {
        "modify a setting".to_string()
    }

    fn add_arguments(&self, cmd: Command, _roles: &RoleCache<'_>) -> Result<Command> {
        let keys = self.keys();
        let key = Arg::new("key").required(true).value_name("key");
        let key = if keys.is_empty() {
            key.value_parser(|s: &str| -> std::result::Result<Value, String> {
                Ok(Value::String(s.to_string()))
            })
        } else {
            key.value_parser(PossibleValuesParser::new(keys).map(Value::String))
        };
        Ok(cmd.arg(key).arg(
            Arg::new("value")
                .required(true)
                .value_parser(|s: &str| -> std::result::Result<Value, String> {
                    Ok(Value::String(s.to_string()))
                }),
        ))
    }

    fn perform(&self, kwargs: Kwargs, _ctx: &mut ActionContext<'_>) -> Result<Response> {
        let key = kwargs.get("key").map(query_value).unwrap_or_default();
        let raw = kwargs.get("value").map(query_value).unwrap_or_default();
        let value = setting_value(&raw);

        let mut patch = serde_json::Map::new();
        patch.insert(key.clone(), value.clone());
        let resp = self.page.join("all").patch(&Value::Object(patch))?;
        let stored = resp
            .as_ref()
            .and_then(|r| r.get(&key))
            .cloned()
            .unwrap_or(value);
        Ok(Response::json(json!({"key": key, "value": stored})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Body;
    use mockito::Matcher;
    use reqwest::blocking::Client;

    fn root() -> ApiRoot {
        ApiRoot::from_body(
            "/api/v2/".into(),
            &json!({
                "organizations": "/api/v2/organizations/",
                "teams": "/api/v2/teams/",
                "users": "/api/v2/users/",
                "projects": "/api/v2/projects/",
                "settings": "/api/v2/settings/"
            }),
        )
        .unwrap()
    }

    fn kwargs(value: Value) -> Kwargs {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn registry_refuses_duplicates_and_keeps_first() {
        let mut reg = ActionRegistry::empty();
        assert!(reg.register("jobs", "stdout", has_stdout));
        assert!(!reg.register("jobs", "stdout", has_monitor));
        assert_eq!(reg.len(), 1);

        let conn = Connection::with_client(Client::new(), "http://127.0.0.1:1");
        let action = reg.create("jobs", "stdout", Page::new(&conn, "/api/v2/jobs/1/")).unwrap();
        assert_eq!(action.about(), "print stdout");
    }

    #[test]
    fn default_registry_covers_builtin_actions() {
        let reg = ActionRegistry::default();
        assert!(reg.contains("job_templates", "launch"));
        assert!(reg.contains("ad_hoc_commands", "create"));
        assert!(reg.contains("workflow_jobs", "monitor"));
        assert!(reg.contains("settings", "modify"));
        assert!(!reg.contains("organizations", "launch"));
        let team_actions: Vec<&str> = reg.actions("teams").collect();
        assert_eq!(team_actions, vec!["grant", "revoke"]);
    }

    #[test]
    fn resources_outside_association_table_get_no_association_actions() {
        let reg = ActionRegistry::default();
        assert!(reg.contains("hosts", "associate"));
        assert!(association_targets("credentials").is_empty());
        assert!(!reg.contains("credentials", "associate"));
        assert!(!reg.contains("credentials", "disassociate"));
    }

    #[test]
    fn association_posts_then_lists_related_collection() {
        let mut server = mockito::Server::new();
        let _detail = server
            .mock("GET", "/api/v2/job_templates/5/")
            .with_status(200)
            .with_body(
                r#"{"id":5,"related":{"notification_templates_started":"/api/v2/job_templates/5/notification_templates_started/"}}"#,
            )
            .create();
        let post = server
            .mock("POST", "/api/v2/job_templates/5/notification_templates_started/")
            .match_body(Matcher::Json(json!({"id": 9, "associate": true})))
            .with_status(204)
            .create();
        let list = server
            .mock("GET", "/api/v2/job_templates/5/notification_templates_started/")
            .with_status(200)
            .with_body(r#"{"count":1,"results":[{"id":9,"name":"slack"}]}"#)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let root = root();
        let roles = RoleCache::with_roles(&conn, &root, BTreeMap::new());
        let mut out = Vec::new();
        let mut ctx = ActionContext {
            conn: &conn,
            root: &root,
            roles: &roles,
            color: false,
            out: &mut out,
        };
        let action = association(
            "job_templates",
            "associate",
            Page::new(&conn, "/api/v2/job_templates/5/"),
        );
        let resp = action
            .perform(kwargs(json!({"start_notification": 9})), &mut ctx)
            .unwrap();
        match resp.body {
            Body::Json(v) => assert_eq!(v["results"][0]["name"], "slack"),
            other => panic!("unexpected body {other:?}"),
        }
        post.assert();
        list.assert();
    }

    #[test]
    fn association_targets_are_mutually_exclusive() {
        let conn = Connection::with_client(Client::new(), "http://127.0.0.1:1");
        let root = root();
        let roles = RoleCache::with_roles(&conn, &root, BTreeMap::new());
        let action = association("hosts", "associate", Page::new(&conn, "/api/v2/hosts/"));
        let cmd = action
            .add_arguments(Command::new("associate"), &roles)
            .unwrap();
        assert!(cmd
            .clone()
            .try_get_matches_from(["associate", "web1"])
            .is_err());
        let m = cmd
            .try_get_matches_from(["associate", "web1", "--group", "dbs"])
            .unwrap();
        assert_eq!(m.get_one::<arguments::IdRef>("group").unwrap().model, "groups");
    }

    #[test]
    fn invalid_role_for_target_fails_before_network() {
        let conn = Connection::with_client(Client::new(), "http://127.0.0.1:1");
        let root = root();
        let mut known = BTreeMap::new();
        known.insert("organization", vec!["admin".to_string(), "member".to_string()]);
        known.insert("project", vec!["admin".to_string(), "use".to_string()]);
        let roles = RoleCache::with_roles(&conn, &root, known);

        let action = role_action("users", "grant", Page::new(&conn, "/api/v2/users/"));
        let err = action
            .validate(&kwargs(json!({"role": "member", "project": "demo"})), &roles)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid choice: 'member' must be one of admin, use"
        );
        assert!(action
            .validate(&kwargs(json!({"role": "use", "project": "demo"})), &roles)
            .is_ok());
    }

    #[test]
    fn teams_cannot_be_granted_team_roles() {
        let conn = Connection::with_client(Client::new(), "http://127.0.0.1:1");
        let root = root();
        let mut known = BTreeMap::new();
        known.insert("team", vec!["member".to_string()]);
        known.insert("organization", vec!["member".to_string()]);
        let roles = RoleCache::with_roles(&conn, &root, known);

        let action = role_action("teams", "grant", Page::new(&conn, "/api/v2/teams/"));
        let cmd = action.add_arguments(Command::new("grant"), &roles).unwrap();
        assert!(cmd.get_arguments().any(|a| a.get_id() == "organization"));
        assert!(!cmd.get_arguments().any(|a| a.get_id() == "team"));
    }

    #[test]
    fn role_cache_loads_once() {
        let mut server = mockito::Server::new();
        let orgs = server
            .mock("OPTIONS", "/api/v2/organizations/")
            .with_status(200)
            .with_body(r#"{"actions":{"GET":{}},"object_roles":["admin_role","member_role"]}"#)
            .expect(1)
            .create();
        let _rest = server
            .mock("OPTIONS", Matcher::Regex("^/api/v2/(teams|projects)/$".into()))
            .with_status(403)
            .with_body("{}")
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let root = root();
        let roles = RoleCache::new(&conn, &root);
        assert_eq!(roles.get()["organization"], vec!["admin", "member"]);
        assert!(roles.all().contains("member"));
        assert!(!roles.get().contains_key("project"));
        orgs.assert();
    }

    #[test]
    fn grant_posts_role_id_to_user_roles() {
        let mut server = mockito::Server::new();
        let _org = server
            .mock("GET", "/api/v2/organizations/3/")
            .with_status(200)
            .with_body(r#"{"id":3,"summary_fields":{"object_roles":{"admin_role":{"id":31}}}}"#)
            .create();
        let _user = server
            .mock("GET", "/api/v2/users/7/")
            .with_status(200)
            .with_body(r#"{"id":7,"related":{"roles":"/api/v2/users/7/roles/"}}"#)
            .create();
        let post = server
            .mock("POST", "/api/v2/users/7/roles/")
            .match_body(Matcher::Json(json!({"id": 31, "associate": true})))
            .with_status(204)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let root = root();
        let mut known = BTreeMap::new();
        known.insert("organization", vec!["admin".to_string()]);
        let roles = RoleCache::with_roles(&conn, &root, known);
        let mut out = Vec::new();
        let mut ctx = ActionContext {
            conn: &conn,
            root: &root,
            roles: &roles,
            color: false,
            out: &mut out,
        };
        let action = role_action("users", "grant", Page::new(&conn, "/api/v2/users/7/"));
        let resp = action
            .perform(kwargs(json!({"role": "admin", "organization": 3})), &mut ctx)
            .unwrap();
        assert!(matches!(resp.body, Body::Empty));
        post.assert();
    }

    #[test]
    fn setting_value_detects_json() {
        assert_eq!(setting_value(r#"["10.0.0.1"]"#), json!(["10.0.0.1"]));
        assert_eq!(setting_value("true"), json!(true));
        assert_eq!(setting_value("https://awx.example.com"), json!("https://awx.example.com"));
    }

    #[test]
    fn take_monitor_options_strips_flags() {
        let mut kw = kwargs(json!({"wait": true, "action_timeout": 30, "interval": 0.5, "limit": "web"}));
        let opts = take_monitor_options(&mut kw).unwrap();
        assert!(!opts.print_stdout);
        assert_eq!(opts.timeout, Some(Duration::from_secs(30)));
        assert_eq!(opts.interval, Duration::from_millis(500));
        assert_eq!(kw.len(), 1);

        let mut kw = kwargs(json!({"limit": "web"}));
        assert!(take_monitor_options(&mut kw).is_none());
    }

    #[test]
    fn launch_sets_rc_when_job_fails() {
        let mut server = mockito::Server::new();
        let _detail = server
            .mock("GET", "/api/v2/job_templates/5/")
            .with_status(200)
            .with_body(r#"{"id":5,"related":{"launch":"/api/v2/job_templates/5/launch/"}}"#)
            .create();
        let launch = server
            .mock("POST", "/api/v2/job_templates/5/launch/")
            .match_body(Matcher::Json(json!({"limit": "web"})))
            .with_status(201)
            .with_body(r#"{"id":42,"type":"job","status":"pending","url":"/api/v2/jobs/42/"}"#)
            .create();
        let _job = server
            .mock("GET", "/api/v2/jobs/42/")
            .with_status(200)
            .with_body(r#"{"id":42,"status":"failed","event_processing_finished":true}"#)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let root = root();
        let roles = RoleCache::with_roles(&conn, &root, BTreeMap::new());
        let mut out = Vec::new();
        let mut ctx = ActionContext {
            conn: &conn,
            root: &root,
            roles: &roles,
            color: false,
            out: &mut out,
        };
        let action = launchable(
            "job_templates",
            "launch",
            Page::new(&conn, "/api/v2/job_templates/5/"),
        );
        let resp = action
            .perform(
                kwargs(json!({"wait": true, "interval": 0.001, "limit": "web"})),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(resp.rc, Some(1));
        match resp.body {
            Body::Json(v) => assert_eq!(v["status"], "failed"),
            other => panic!("unexpected body {other:?}"),
        }
        launch.assert();
    }

    #[test]
    fn stdout_requests_text_download_without_color() {
        let mut server = mockito::Server::new();
        let _detail = server
            .mock("GET", "/api/v2/jobs/42/")
            .with_status(200)
            .with_body(r#"{"id":42,"related":{"stdout":"/api/v2/jobs/42/stdout/"}}"#)
            .create();
        let stdout = server
            .mock("GET", "/api/v2/jobs/42/stdout/")
            .match_query(Matcher::UrlEncoded("format".into(), "txt_download".into()))
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body("PLAY RECAP\n")
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let root = root();
        let roles = RoleCache::with_roles(&conn, &root, BTreeMap::new());
        let mut out = Vec::new();
        let mut ctx = ActionContext {
            conn: &conn,
            root: &root,
            roles: &roles,
            color: false,
            out: &mut out,
        };
        let action = has_stdout("jobs", "stdout", Page::new(&conn, "/api/v2/jobs/42/"));
        let resp = action.perform(Kwargs::new(), &mut ctx).unwrap();
        assert!(matches!(resp.body, Body::Text(ref t) if t == "PLAY RECAP\n"));
        stdout.assert();
    }

    #[test]
    fn monitor_refuses_finished_jobs() {
        let mut server = mockito::Server::new();
        let _detail = server
            .mock("GET", "/api/v2/jobs/42/")
            .with_status(200)
            .with_body(r#"{"id":42,"status":"successful","failed":false}"#)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let root = root();
        let roles = RoleCache::with_roles(&conn, &root, BTreeMap::new());
        let mut out = Vec::new();
        let mut ctx = ActionContext {
            conn: &conn,
            root: &root,
            roles: &roles,
            color: false,
            out: &mut out,
        };
        let action = has_monitor("jobs", "monitor", Page::new(&conn, "/api/v2/jobs/42/"));
        let resp = action.perform(Kwargs::new(), &mut ctx).unwrap();
        assert!(matches!(resp.body, Body::Text(ref t) if t == "Unable to monitor finished job"));
    }

    #[test]
    fn settings_list_uses_slug() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/v2/settings/jobs/")
            .with_status(200)
            .with_body(r#"{"AWX_TASK_ENV":{}}"#)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let root = root();
        let roles = RoleCache::with_roles(&conn, &root, BTreeMap::new());
        let mut out = Vec::new();
        let mut ctx = ActionContext {
            conn: &conn,
            root: &root,
            roles: &roles,
            color: false,
            out: &mut out,
        };
        let action = settings_list("settings", "list", Page::new(&conn, "/api/v2/settings/"));
        action
            .perform(kwargs(json!({"slug": "jobs"})), &mut ctx)
            .unwrap();
        mock.assert();
    }
}
