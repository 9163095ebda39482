//! Front controller: settings → connection → grammar → dispatch → output.
//!
//! Every error is caught once here, presented, and mapped to an exit code.

use std::future::Future;
use std::io::{Read, Write};
use std::sync::mpsc;
use std::task::Poll;
use std::thread;

use clap::ArgMatches;
use colored::Colorize;
use tracing::debug;

use crate::client::{Auth, Connection};
use crate::commands;
use crate::config::{prescan, Env, Prescan, Settings};
use crate::custom::{ActionContext, ActionRegistry, RoleCache};
use crate::dispatch::{dispatch, Body, Response};
use crate::error::{CliError, Result};
use crate::format::{default_columns, format_response, format_value, transpose, Format};
use crate::grammar::{root_command, CliConfig, GrammarBuilder, Selection};
use crate::logging;
use crate::resources::{self, ApiRoot};

/// Actions whose output is highlighted as a change.
const MUTATING_ACTIONS: &[&str] = &["create", "modify", "associate", "disassociate"];

/// Resources shown as `key`/`value` rows in the human format.
const TRANSPOSED_RESOURCES: &[&str] = &["metrics", "settings"];

/// Exit on Ctrl-C without printing partial output.
///
/// Returns once the handler is installed; `false` if it could not be.
pub fn watch_interrupt() -> bool {
    let (armed_tx, armed_rx) = mpsc::channel();
    thread::spawn(move || {
        let Ok(rt) = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        else {
            return;
        };
        let interrupted = rt.block_on(async {
            let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
            // the first poll registers the handler
            let first = std::future::poll_fn(|cx| Poll::Ready(ctrl_c.as_mut().poll(cx))).await;
            let _ = armed_tx.send(!matches!(first, Poll::Ready(Err(_))));
            match first {
                Poll::Ready(result) => result,
                Poll::Pending => ctrl_c.await,
            }
        });
        if interrupted.is_ok() {
            std::process::exit(CliError::Interrupted.exit_code());
        }
    });
    armed_rx.recv().unwrap_or(false)
}

/// Run with the process arguments, environment and standard streams.
pub fn run() -> i32 {
    let argv: Vec<String> = std::env::args().collect();
    let env = Env::from_process();
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    run_with(
        argv,
        &env,
        &mut stdin.lock(),
        &mut stdout.lock(),
        &mut stderr.lock(),
    )
}

/// Run one invocation. `argv` includes the program name.
pub fn run_with<I, S>(
    argv: I,
    env: &Env,
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
    let scan = prescan(argv.get(1..).unwrap_or_default());

    let mut settings = Settings::from_env(env);
    scan.apply(&mut settings);
    logging::init(settings.verbose, settings.color);
    colored::control::set_override(settings.color);

    match execute(&argv, &scan, &mut settings, stdin, stdout) {
        Ok(rc) => rc,
        Err(err) => report(&err, &settings, stdout, stderr),
    }
}

fn connect(settings: &Settings) -> Result<Connection> {
    let mut conn = Connection::new(&settings.host, settings.insecure)?;
    match &settings.token {
        Some(token) => conn.login(Auth::Token(token.clone())),
        None => conn.login(Auth::Basic {
            username: settings.username.clone(),
            password: settings.password.clone(),
        }),
    }
    Ok(conn)
}

/// Overlay global flags from every level of the parsed tree; the deepest wins.
fn apply_globals(settings: &mut Settings, matches: &ArgMatches) {
    let mut current = Some(matches);
    while let Some(m) = current {
        settings.update_from_matches(m);
        current = m.subcommand().map(|(_, sub)| sub);
    }
}

fn execute(
    argv: &[String],
    scan: &Prescan,
    settings: &mut Settings,
    stdin: &mut dyn Read,
    stdout: &mut dyn Write,
) -> Result<i32> {
    let config = CliConfig::default();

    // needs no server
    if scan.resource().is_none() || scan.resource() == Some("config") {
        let matches = root_command(&config).try_get_matches_from(argv)?;
        apply_globals(settings, &matches);
        return emit(&commands::config(settings), settings, "config", false, stdout);
    }

    let conn = connect(settings)?;
    let root = ApiRoot::discover(&conn)?;
    let registry = ActionRegistry::default();
    let roles = RoleCache::new(&conn, &root);
    let builder = GrammarBuilder {
        conn: &conn,
        root: &root,
        registry: &registry,
        roles: &roles,
    };

    let selection = scan
        .resource()
        .filter(|r| !commands::is_builtin(r))
        .map(|resource| Selection {
            resource,
            action: scan.action(),
        });
    let mut cmd = builder.build(&config, selection)?;
    let matches = cmd.try_get_matches_from_mut(argv)?;
    apply_globals(settings, &matches);

    let Some((name, sub)) = matches.subcommand() else {
        return Err(CliError::validation("no resource given"));
    };
    debug!(command = name, "parsed");

    let response = match name {
        "login" => commands::login(&conn, &root, settings, sub)?,
        "import" => commands::import(&conn, &root, stdin)?,
        "export" => commands::export(&conn, &root, settings.format, sub)?,
        resource if resources::is_control(resource) => {
            let page = root
                .page(&conn, resource)
                .ok_or_else(|| CliError::validation(format!("unknown resource: {resource}")))?;
            Response::json(page.get(&[])?)
        }
        resource => {
            let Some((action, action_matches)) = sub.subcommand() else {
                return Err(CliError::validation(format!("{resource} needs an action")));
            };
            let mut help_cmd = cmd
                .find_subcommand_mut(resource)
                .and_then(|r| r.find_subcommand_mut(action))
                .map(|c| c.clone())
                .unwrap_or_else(|| clap::Command::new(action.to_string()));
            let mut ctx = ActionContext {
                conn: &conn,
                root: &root,
                roles: &roles,
                color: settings.color,
                out: &mut *stdout,
            };
            let response = dispatch(
                &mut ctx,
                &registry,
                resource,
                action,
                action_matches,
                &mut help_cmd,
            )?;
            let changed = MUTATING_ACTIONS.contains(&action);
            return emit(&response, settings, resource, changed, stdout);
        }
    };
    emit(&response, settings, name, false, stdout)
}

/// Print a response; returns the exit status it carries.
fn emit(
    response: &Response,
    settings: &Settings,
    resource: &str,
    changed: bool,
    stdout: &mut dyn Write,
) -> Result<i32> {
    let human = settings.format == Format::Human;
    let mut filter = settings.filter.clone();
    let mut shaped = None;

    if human {
        if let Body::Json(value) = &response.body {
            if TRANSPOSED_RESOURCES.contains(&resource) && value.get("results").is_none() {
                shaped = Some(Response {
                    body: Body::Json(transpose(value)),
                    rc: response.rc,
                });
                filter = "key,value".to_string();
            } else if filter == "." {
                filter = default_columns(resource);
            }
        }
    }

    let response = shaped.as_ref().unwrap_or(response);
    if let Some(text) = format_response(response, settings.format, &filter, changed)? {
        let text = text.trim_end_matches('\n');
        if !text.is_empty() {
            writeln!(stdout, "{text}")?;
        }
    }
    Ok(response.rc.unwrap_or(0))
}

/// Present an error and return the exit status.
fn report(
    err: &CliError,
    settings: &Settings,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    // output failures while reporting leave nowhere else to report to
    let _ = present(err, settings, stdout, stderr);
    err.exit_code()
}

fn present(
    err: &CliError,
    settings: &Settings,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> std::io::Result<()> {
    match err {
        CliError::Usage(e) => {
            let rendered = e.render();
            let text = if settings.color {
                rendered.ansi().to_string()
            } else {
                rendered.to_string()
            };
            debug!(kind = ?e.kind(), "argument parsing stopped");
            if e.use_stderr() {
                write!(stderr, "{text}")?;
            } else {
                write!(stdout, "{text}")?;
            }
        }
        CliError::Connectivity { host, ssl, .. } => {
            writeln!(
                stderr,
                "{}",
                format!(
                    "There was a network error of some kind trying to reach {host}.\n\
                     You might need to specify (or double-check) --conf.host"
                )
                .red()
            )?;
            if *ssl {
                writeln!(
                    stderr,
                    "{}",
                    "SSL validation failed; try passing -k/--conf.insecure".yellow()
                )?;
            }
        }
        CliError::Unauthorized { .. } => {
            writeln!(
                stderr,
                "{}",
                "Valid credentials were not provided.\n$ awx login --help".red()
            )?;
        }
        CliError::Api { body, .. } => {
            let fmt = match settings.format {
                Format::Yaml => Format::Yaml,
                _ => Format::Json,
            };
            let text = format_value(body, fmt, ".").unwrap_or_else(|_| body.to_string());
            writeln!(stderr, "{}", text.trim_end_matches('\n').red())?;
        }
        CliError::Interrupted => {}
        other => {
            writeln!(stderr, "{}", other.to_string().red())?;
        }
    }

    if settings.verbose {
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            writeln!(stderr, "  caused by: {cause}")?;
            source = std::error::Error::source(cause);
        }
    }
    Ok(())
}
