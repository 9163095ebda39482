//! Poll a launched job until it finishes, optionally streaming its output.

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;
use serde_json::Value;
use tracing::debug;

use crate::client::{query_value, related_page, Connection, Page};
use crate::error::{CliError, Result};

/// Workflow jobs are polled no faster than this.
const WORKFLOW_MIN_INTERVAL: Duration = Duration::from_millis(2500);

const STREAM_START: &str = "------Starting Standard Out Stream------";
const STREAM_END: &str = "------End of Standard Out Stream--------\n";
const TIMED_OUT: &str = "Monitoring aborted due to action-timeout.";

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Stream events (`--monitor`) instead of waiting silently (`--wait`).
    pub print_stdout: bool,
    pub interval: Duration,
    /// Client-side wait budget; the job itself keeps running.
    pub timeout: Option<Duration>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            print_stdout: true,
            interval: Duration::from_millis(250),
            timeout: None,
        }
    }
}

/// Block until `job` reaches a terminal state; returns its last known status.
pub fn monitor(
    conn: &Connection,
    job: &Value,
    opts: &MonitorOptions,
    out: &mut dyn Write,
) -> Result<Option<String>> {
    let url = job
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| CliError::validation("unable to monitor a job without a url"))?;
    let detail = Page::new(conn, url);

    if job.get("type").and_then(Value::as_str) == Some("workflow_job") {
        monitor_workflow(&detail, job, opts, out)
    } else {
        monitor_job(&detail, job, opts, out)
    }
}

fn status_of(job: &Value) -> Option<String> {
    job.get("status").and_then(Value::as_str).map(str::to_string)
}

fn timed_out(started: Instant, opts: &MonitorOptions) -> bool {
    opts.timeout.is_some_and(|t| started.elapsed() > t)
}

fn monitor_job(
    detail: &Page<'_>,
    job: &Value,
    opts: &MonitorOptions,
    out: &mut dyn Write,
) -> Result<Option<String>> {
    let events_name = if job.get("type").and_then(Value::as_str) == Some("job") {
        "job_events"
    } else {
        "events"
    };
    let events = related_page(detail, job, events_name);
    let mut next_line = 0;

    if opts.print_stdout {
        writeln!(out, "{}", STREAM_START.red())?;
    }

    let started = Instant::now();
    loop {
        if timed_out(started, opts) {
            if opts.print_stdout {
                writeln!(out, "{}", TIMED_OUT.red())?;
            }
            break;
        }
        if opts.print_stdout {
            next_line = stream_events(&events, next_line, out)?;
        }
        thread::sleep(opts.interval);

        let current = detail.get(&[])?;
        let finished = current.get("event_processing_finished") == Some(&Value::Bool(true));
        let status = status_of(&current);
        debug!(status = ?status, finished, "polled job");
        if finished || matches!(status.as_deref(), Some("error" | "canceled")) {
            if opts.print_stdout {
                stream_events(&events, next_line, out)?;
            }
            break;
        }
    }

    if opts.print_stdout {
        writeln!(out, "{}", STREAM_END.red())?;
    }
    Ok(status_of(&detail.get(&[])?))
}

/// Print events in line order starting at `next_line`; returns the new cursor.
///
/// Events that arrive ahead of a gap are held back until the gap fills.
fn stream_events(events: &Page<'_>, mut next_line: i64, out: &mut dyn Write) -> Result<i64> {
    let mut query = vec![
        ("order_by".to_string(), "start_line".to_string()),
        ("no_truncate".to_string(), "true".to_string()),
    ];
    if next_line > 0 {
        query.push(("start_line__gte".to_string(), next_line.to_string()));
    }

    let page = events.get(&query)?;
    for event in page
        .get("results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if event.get("start_line").and_then(Value::as_i64) != Some(next_line) {
            continue;
        }
        let stdout = event.get("stdout").map(query_value).unwrap_or_default();
        if !stdout.is_empty() {
            writeln!(out, "{stdout}")?;
        }
        next_line = event
            .get("end_line")
            .and_then(Value::as_i64)
            .unwrap_or(next_line);
    }
    Ok(next_line)
}

fn monitor_workflow(
    detail: &Page<'_>,
    job: &Value,
    opts: &MonitorOptions,
    out: &mut dyn Write,
) -> Result<Option<String>> {
    if opts.print_stdout {
        writeln!(out, "{}", STREAM_START.red())?;
        let name = job.get("name").map(query_value).unwrap_or_default();
        writeln!(out, "Launching {name}...")?;
    }

    let started = Instant::now();
    loop {
        if timed_out(started, opts) {
            if opts.print_stdout {
                writeln!(out, "{}", TIMED_OUT.red())?;
            }
            break;
        }
        thread::sleep(opts.interval.max(WORKFLOW_MIN_INTERVAL));
        let current = detail.get(&[])?;
        if current.get("finished").is_some_and(|f| !f.is_null()) {
            if opts.print_stdout {
                print_nodes(detail, job, out)?;
            }
            break;
        }
    }

    if opts.print_stdout {
        writeln!(out, "{}", STREAM_END.red())?;
    }
    Ok(status_of(&detail.get(&[])?))
}

/// One line per job the workflow spawned, ordered by finish time.
fn print_nodes(detail: &Page<'_>, job: &Value, out: &mut dyn Write) -> Result<()> {
    let conn = detail.connection();
    let id = job.get("id").map(query_value).unwrap_or_default();
    let query = vec![
        ("order_by".to_string(), "finished".to_string()),
        ("unified_job_node__workflow_job".to_string(), id),
    ];
    let version = detail
        .endpoint()
        .split("workflow_jobs/")
        .next()
        .unwrap_or("/api/v2/");
    let nodes = Page::new(conn, format!("{version}unified_jobs/")).get(&query)?;
    for node in nodes
        .get("results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let status = node.get("status").map(query_value).unwrap_or_default();
        writeln!(
            out,
            " ↳ {} - {} {}",
            node.get("id").map(query_value).unwrap_or_default(),
            node.get("name").map(query_value).unwrap_or_default(),
            color_status(&status)
        )?;
    }
    Ok(())
}

fn color_status(status: &str) -> colored::ColoredString {
    match status {
        "running" => status.yellow(),
        "successful" => status.green(),
        "failed" | "error" => status.red(),
        "new" | "pending" | "canceled" => status.bright_black(),
        _ => status.white(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use reqwest::blocking::Client;
    use serde_json::json;

    fn fast() -> MonitorOptions {
        MonitorOptions {
            print_stdout: true,
            interval: Duration::from_millis(1),
            timeout: None,
        }
    }

    #[test]
    fn streams_events_in_line_order_until_processing_finishes() {
        let mut server = mockito::Server::new();
        let _detail = server
            .mock("GET", "/api/v2/jobs/42/")
            .with_status(200)
            .with_body(r#"{"id":42,"status":"successful","event_processing_finished":true}"#)
            .create();
        let _events = server
            .mock("GET", "/api/v2/jobs/42/job_events/")
            .match_query(Matcher::UrlEncoded("order_by".into(), "start_line".into()))
            .with_status(200)
            .with_body(
                r#"{"results":[
                    {"start_line":0,"end_line":1,"stdout":"PLAY [all]"},
                    {"start_line":5,"end_line":6,"stdout":"out of order"},
                    {"start_line":1,"end_line":2,"stdout":"TASK [ping]"}
                ]}"#,
            )
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let job = json!({
            "id": 42, "type": "job", "url": "/api/v2/jobs/42/",
            "related": {"job_events": "/api/v2/jobs/42/job_events/"}
        });
        let mut out = Vec::new();
        let status = monitor(&conn, &job, &fast(), &mut out).unwrap();
        assert_eq!(status.as_deref(), Some("successful"));

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("PLAY [all]"));
        assert!(text.contains("TASK [ping]"));
        assert!(!text.contains("out of order"));
        assert!(text.contains("Starting Standard Out Stream"));
    }

    #[test]
    fn wait_mode_never_fetches_events() {
        let mut server = mockito::Server::new();
        let _detail = server
            .mock("GET", "/api/v2/jobs/7/")
            .with_status(200)
            .with_body(r#"{"id":7,"status":"failed","event_processing_finished":true}"#)
            .create();
        let events = server
            .mock("GET", Matcher::Regex("job_events".into()))
            .expect(0)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let job = json!({"id": 7, "type": "job", "url": "/api/v2/jobs/7/"});
        let opts = MonitorOptions {
            print_stdout: false,
            ..fast()
        };
        let mut out = Vec::new();
        let status = monitor(&conn, &job, &opts, &mut out).unwrap();
        assert_eq!(status.as_deref(), Some("failed"));
        assert!(out.is_empty());
        events.assert();
    }

    #[test]
    fn error_status_stops_polling_without_processing_flag() {
        let mut server = mockito::Server::new();
        let _detail = server
            .mock("GET", "/api/v2/project_updates/3/")
            .with_status(200)
            .with_body(r#"{"id":3,"status":"error","event_processing_finished":false}"#)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let job = json!({"id": 3, "type": "project_update", "url": "/api/v2/project_updates/3/"});
        let opts = MonitorOptions {
            print_stdout: false,
            ..fast()
        };
        let status = monitor(&conn, &job, &opts, &mut Vec::new()).unwrap();
        assert_eq!(status.as_deref(), Some("error"));
    }

    #[test]
    fn timeout_aborts_client_side_wait() {
        let mut server = mockito::Server::new();
        let _detail = server
            .mock("GET", "/api/v2/jobs/9/")
            .with_status(200)
            .with_body(r#"{"id":9,"status":"running","event_processing_finished":false}"#)
            .create();
        let _events = server
            .mock("GET", "/api/v2/jobs/9/job_events/")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"results":[]}"#)
            .create();

        let conn = Connection::with_client(Client::new(), &server.url());
        let job = json!({"id": 9, "type": "job", "url": "/api/v2/jobs/9/"});
        let opts = MonitorOptions {
            timeout: Some(Duration::from_millis(20)),
            ..fast()
        };
        let mut out = Vec::new();
        let status = monitor(&conn, &job, &opts, &mut out).unwrap();
        assert_eq!(status.as_deref(), Some("running"));
        assert!(String::from_utf8(out).unwrap().contains(TIMED_OUT));
    }

    #[test]
    fn job_without_url_cannot_be_monitored() {
        let conn = Connection::with_client(Client::new(), "http://127.0.0.1:1");
        let err = monitor(&conn, &json!({"id": 1}), &fast(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CliError::Validation(_)));
    }
}
