//! API root → clap Command tree builder
//!
//! Structure: `<name> <resource> <action> [id] [--flags]`. Every resource
//! the API root lists becomes a subcommand; only the resource named on the
//! command line is expanded into its actions, since that costs an OPTIONS
//! round trip.

use clap::builder::{BoolishValueParser, PossibleValuesParser, TypedValueParser};
use clap::{Arg, ArgAction, Command};
use colored::Colorize;
use serde_json::Value;
use tracing::debug;

use crate::arguments::{self, id_arg, Action};
use crate::client::Connection;
use crate::commands;
use crate::custom::{ActionRegistry, RoleCache};
use crate::error::{CliError, Result};
use crate::format::Format;
use crate::options::{self, HttpMethod, OptionsSchema};
use crate::resources::{self, ApiRoot};

const DEPRECATION_NOTICE: &str =
    "This resource has been deprecated and will be removed in a future release.";

/// Configuration for the root command.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CliConfig {
    /// Root command name (e.g. "awx")
    pub name: String,
    /// Root command about/description
    pub about: String,
    /// Leave out the deprecated singular resource aliases.
    pub skip_deprecated: bool,
}

impl CliConfig {
    pub fn new(name: impl Into<String>, about: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            about: about.into(),
            skip_deprecated: false,
        }
    }

    pub fn skip_deprecated(mut self, skip: bool) -> Self {
        self.skip_deprecated = skip;
        self
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self::new("awx", "Command-line client for the AWX REST API")
    }
}

/// The resource and action named on the command line, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'s> {
    pub resource: &'s str,
    pub action: Option<&'s str>,
}

/// Root command with global flags and the built-in commands, no resources.
pub fn root_command(config: &CliConfig) -> Command {
    Command::new(config.name.clone())
        .about(config.about.clone())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .args(global_args())
        .subcommand(commands::login_command())
        .subcommand(commands::config_command())
        .subcommand(commands::import_command())
}

fn global_args() -> Vec<Arg> {
    let heading = "input/output formatting";
    vec![
        Arg::new("conf.host")
            .long("conf.host")
            .value_name("https://example.awx.org")
            .global(true),
        Arg::new("conf.token")
            .long("conf.token")
            .value_name("TEXT")
            .help("an OAuth2.0 token (get one by using `awx login`)")
            .global(true),
        Arg::new("conf.username")
            .long("conf.username")
            .value_name("TEXT")
            .global(true),
        Arg::new("conf.password")
            .long("conf.password")
            .value_name("TEXT")
            .global(true),
        Arg::new("conf.insecure")
            .short('k')
            .long("conf.insecure")
            .action(ArgAction::SetTrue)
            .help("Allow insecure server connections when using SSL")
            .global(true),
        Arg::new("conf.format")
            .short('f')
            .long("conf.format")
            .value_name("FORMAT")
            .value_parser(
                PossibleValuesParser::new(Format::NAMES)
                    .map(|s| Format::parse(&s).unwrap_or_default()),
            )
            .help("specify a format for the input and output")
            .help_heading(heading)
            .global(true),
        Arg::new("filter")
            .long("filter")
            .value_name("TEXT")
            .help(
                "specify an output filter (only valid with jq or human format); \
                 defaults to `.` (every field) for jq and `id,name` for human",
            )
            .help_heading(heading)
            .global(true),
        Arg::new("conf.color")
            .long("conf.color")
            .value_name("BOOLEAN")
            .value_parser(BoolishValueParser::new())
            .help("Display colorized output. Defaults to True")
            .help_heading(heading)
            .global(true),
        Arg::new("verbose")
            .short('v')
            .long("verbose")
            .action(ArgAction::SetTrue)
            .help("print debug-level logs, including requests made")
            .help_heading(heading)
            .global(true),
    ]
}

/// Builds resource subcommands against a live API root.
pub struct GrammarBuilder<'a> {
    pub conn: &'a Connection,
    pub root: &'a ApiRoot,
    pub registry: &'a ActionRegistry,
    pub roles: &'a RoleCache<'a>,
}

impl GrammarBuilder<'_> {
    /// Full command tree. `selected` is expanded into its actions; every
    /// other resource is a bare entry for help output.
    pub fn build(&self, config: &CliConfig, selected: Option<Selection<'_>>) -> Result<Command> {
        let mut cmd = root_command(config).subcommand(commands::export_command(self.root));
        let wanted = selected.map(|s| resources::resolve(s.resource));

        for name in self.root.names() {
            let mut sub = if wanted == Some(name) {
                self.resource_command(name, selected.and_then(|s| s.action))?
            } else {
                stub(name)
            };
            if !config.skip_deprecated {
                if let Some(alias) = resources::deprecated_alias(name) {
                    // a root that lists the alias itself keeps it as a resource
                    if !self.root.resources.contains_key(alias) {
                        sub = sub.alias(alias);
                    }
                }
            }
            cmd = cmd.subcommand(sub);
        }
        Ok(cmd)
    }

    /// One resource with its actions. Flags are synthesized for every
    /// generic action; custom actions add theirs only when `action` names
    /// them, since that may cost further probes.
    pub fn resource_command(&self, name: &str, action: Option<&str>) -> Result<Command> {
        let page = self
            .root
            .page(self.conn, name)
            .ok_or_else(|| CliError::validation(format!("unknown resource: {name}")))?;

        if resources::is_control(name) {
            return Ok(Command::new(name.to_string()).about(format!("GET {}", page.endpoint())));
        }

        let mut cmd = Command::new(name.to_string())
            .subcommand_required(true)
            .arg_required_else_help(true);

        let schema = if name == "settings" {
            // settings has no list/detail pattern; its actions are all custom
            OptionsSchema::default()
        } else {
            options::fetch(&page)?
        };
        if schema.deprecated {
            cmd = cmd.about(DEPRECATION_NOTICE.yellow().to_string());
        }

        let generic: Vec<Action> = if name == "settings" {
            Vec::new()
        } else {
            self.generic_actions(name, &schema, &page)
        };

        let mut added = Vec::new();
        for act in &generic {
            if self.registry.contains(name, act.as_str()) {
                continue;
            }
            added.push(act.as_str());
            cmd = cmd.subcommand(action_command(name, *act, &schema));
        }

        for custom_name in self.registry.actions(name) {
            if added.contains(&custom_name) {
                continue;
            }
            let base = match Action::parse(custom_name) {
                Some(act) if generic.contains(&act) => action_command(name, act, &schema),
                _ => Command::new(custom_name),
            };
            let Some(custom) = self.registry.create(name, custom_name, page.clone()) else {
                continue;
            };
            let mut sub = base;
            let about = custom.about();
            if !about.is_empty() {
                sub = sub.about(about);
            }
            if action == Some(custom_name) {
                sub = custom.add_arguments(sub, self.roles)?;
            }
            added.push(custom_name);
            cmd = cmd.subcommand(sub);
        }
        Ok(cmd)
    }

    /// Generic actions `resource` supports.
    ///
    /// `modify` and `delete` follow the `Allow` header of a detail probe;
    /// both are offered when the probe fails.
    fn generic_actions(
        &self,
        resource: &str,
        schema: &OptionsSchema,
        page: &crate::client::Page<'_>,
    ) -> Vec<Action> {
        let detail = options::detail_methods(page);
        let allows = |methods: &[HttpMethod]| {
            detail
                .as_ref()
                .map_or(true, |d| methods.iter().any(|m| d.contains(m)))
        };
        let actions: Vec<Action> = Action::ALL
            .into_iter()
            .filter(|act| match act {
                Action::List => schema.supports(HttpMethod::Get),
                Action::Create => schema.supports(HttpMethod::Post),
                Action::Get => true,
                Action::Modify => allows(&[HttpMethod::Put, HttpMethod::Patch]),
                Action::Delete => allows(&[HttpMethod::Delete]),
            })
            .collect();
        debug!(resource, ?actions, "generic actions");
        actions
    }
}

fn stub(name: &str) -> Command {
    Command::new(name.to_string())
}

/// A generic action subcommand with its synthesized flags.
pub fn action_command(resource: &str, action: Action, schema: &OptionsSchema) -> Command {
    let singular = resource.trim_end_matches('s');
    let about = match action {
        Action::List => format!("list {resource}"),
        Action::Create => format!("create a new {singular}"),
        Action::Get => format!("get a single {singular}"),
        Action::Modify => format!("modify an existing {singular}"),
        Action::Delete => format!("remove an existing {singular}"),
    };
    let mut cmd = Command::new(action.as_str()).about(about);
    if action.takes_id() {
        cmd = cmd.arg(id_arg(resource));
    }
    if action == Action::List {
        cmd = cmd
            .arg(
                Arg::new("all_pages")
                    .long("all")
                    .action(ArgAction::SetTrue)
                    .help("fetch all pages of content from the API when returning results"),
            )
            .arg(
                Arg::new("order_by")
                    .long("order_by")
                    .value_name("FIELD")
                    .value_parser(|s: &str| -> std::result::Result<Value, String> {
                        Ok(Value::String(s.to_string()))
                    })
                    .help("order results by given field name, prefix the field name with a dash (-) to sort in reverse"),
            );
    }
    arguments::attach(cmd, &arguments::build(schema, action, resource))
}
