//! Connection and output settings.
//!
//! Layered lowest to highest: built-in defaults, environment variables
//! (current name first, legacy `TOWER_*` name as fallback), global flags.

use std::collections::BTreeMap;

use clap::ArgMatches;

use crate::arguments::strtobool;
use crate::format::Format;

pub const DEFAULT_HOST: &str = "https://127.0.0.1:443";

pub const HOST_VARS: &[&str] = &["CONTROLLER_HOST", "TOWER_HOST"];
pub const TOKEN_VARS: &[&str] = &[
    "CONTROLLER_OAUTH_TOKEN",
    "CONTROLLER_TOKEN",
    "TOWER_OAUTH_TOKEN",
    "TOWER_TOKEN",
];
pub const USERNAME_VARS: &[&str] = &["CONTROLLER_USERNAME", "TOWER_USERNAME"];
pub const PASSWORD_VARS: &[&str] = &["CONTROLLER_PASSWORD", "TOWER_PASSWORD"];
pub const VERIFY_SSL_VARS: &[&str] = &["CONTROLLER_VERIFY_SSL", "TOWER_VERIFY_SSL"];
pub const FORMAT_VARS: &[&str] = &["CONTROLLER_FORMAT", "TOWER_FORMAT"];
pub const COLOR_VARS: &[&str] = &["CONTROLLER_COLOR", "TOWER_COLOR"];
/// Any non-empty value disables color unless a color variable is set.
pub const NO_COLOR_VAR: &str = "NO_COLOR";
pub const VERBOSE_VARS: &[&str] = &["CONTROLLER_VERBOSE", "TOWER_VERBOSE"];

/// Snapshot of the environment, injectable for tests.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// First non-empty value among `names`.
    pub fn first(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|n| self.get(n))
            .find(|v| !v.is_empty())
    }

    fn first_bool(&self, names: &[&str]) -> Option<bool> {
        self.first(names).and_then(strtobool)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub token: Option<String>,
    pub username: String,
    pub password: String,
    pub insecure: bool,
    pub format: Format,
    pub filter: String,
    pub color: bool,
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            token: None,
            username: "admin".to_string(),
            password: "password".to_string(),
            insecure: false,
            format: Format::Json,
            filter: ".".to_string(),
            color: true,
            verbose: false,
        }
    }
}

impl Settings {
    pub fn from_env(env: &Env) -> Self {
        let mut s = Self::default();
        if let Some(host) = env.first(HOST_VARS) {
            s.host = host.to_string();
        }
        s.token = env.first(TOKEN_VARS).map(str::to_string);
        if let Some(username) = env.first(USERNAME_VARS) {
            s.username = username.to_string();
        }
        if let Some(password) = env.first(PASSWORD_VARS) {
            s.password = password.to_string();
        }
        if let Some(verify) = env.first_bool(VERIFY_SSL_VARS) {
            s.insecure = !verify;
        }
        if let Some(format) = env.first(FORMAT_VARS).and_then(Format::parse) {
            s.format = format;
        }
        if env.first(&[NO_COLOR_VAR]).is_some() {
            s.color = false;
        }
        if let Some(color) = env.first_bool(COLOR_VARS) {
            s.color = color;
        }
        if let Some(verbose) = env.first_bool(VERBOSE_VARS) {
            s.verbose = verbose;
        }
        s
    }

    /// Apply one global flag occurrence. Unparseable values are left to clap.
    pub fn apply_flag(&mut self, id: &str, value: Option<&str>) {
        match (id, value) {
            ("conf.host", Some(v)) => self.host = v.to_string(),
            ("conf.token", Some(v)) => self.token = Some(v.to_string()),
            ("conf.username", Some(v)) => self.username = v.to_string(),
            ("conf.password", Some(v)) => self.password = v.to_string(),
            ("conf.insecure", _) => self.insecure = true,
            ("conf.format", Some(v)) => {
                if let Some(f) = Format::parse(v) {
                    self.format = f;
                }
            }
            ("filter", Some(v)) => self.filter = v.to_string(),
            ("conf.color", Some(v)) => {
                if let Some(c) = strtobool(v) {
                    self.color = c;
                }
            }
            ("verbose", _) => self.verbose = true,
            _ => {}
        }
    }

    /// Overlay the global flags clap parsed.
    pub fn update_from_matches(&mut self, m: &ArgMatches) {
        for id in ["conf.host", "conf.token", "conf.username", "conf.password", "filter"] {
            if let Ok(Some(v)) = m.try_get_one::<String>(id) {
                self.apply_flag(id, Some(v));
            }
        }
        if let Ok(Some(f)) = m.try_get_one::<Format>("conf.format") {
            self.format = *f;
        }
        if let Ok(Some(c)) = m.try_get_one::<bool>("conf.color") {
            self.color = *c;
        }
        if matches!(m.try_get_one::<bool>("conf.insecure"), Ok(Some(true))) {
            self.insecure = true;
        }
        if matches!(m.try_get_one::<bool>("verbose"), Ok(Some(true))) {
            self.verbose = true;
        }
    }
}

/// Global flags that consume a value, by every spelling.
const VALUE_FLAGS: &[(&str, &str)] = &[
    ("--conf.host", "conf.host"),
    ("--conf.token", "conf.token"),
    ("--conf.username", "conf.username"),
    ("--conf.password", "conf.password"),
    ("--conf.format", "conf.format"),
    ("-f", "conf.format"),
    ("--filter", "filter"),
    ("--conf.color", "conf.color"),
];

const SWITCH_FLAGS: &[(&str, &str)] = &[
    ("--conf.insecure", "conf.insecure"),
    ("-k", "conf.insecure"),
    ("--verbose", "verbose"),
    ("-v", "verbose"),
];

/// What a cheap pass over argv reveals before the grammar exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prescan {
    /// Non-flag tokens in order: resource, action, ...
    pub positionals: Vec<String>,
    /// Global flag occurrences as `(arg id, value)`.
    pub flags: Vec<(String, Option<String>)>,
}

impl Prescan {
    pub fn resource(&self) -> Option<&str> {
        self.positionals.first().map(String::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.positionals.get(1).map(String::as_str)
    }

    pub fn apply(&self, settings: &mut Settings) {
        for (id, value) in &self.flags {
            settings.apply_flag(id, value.as_deref());
        }
    }
}

/// Scan argv (without the program name) for the resource token and global flags.
///
/// Flags that are not global are skipped; their values may be mistaken
/// for positionals, but only the first two positionals are ever used and
/// resource-specific flags follow them.
pub fn prescan<S: AsRef<str>>(args: &[S]) -> Prescan {
    let mut out = Prescan::default();
    let mut iter = args.iter().map(AsRef::as_ref);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }
        if let Some((flag, value)) = arg.split_once('=') {
            if let Some((_, id)) = VALUE_FLAGS.iter().find(|(f, _)| *f == flag) {
                out.flags.push((id.to_string(), Some(value.to_string())));
                continue;
            }
        }
        if let Some((_, id)) = VALUE_FLAGS.iter().find(|(f, _)| *f == arg) {
            let value = iter.next().map(str::to_string);
            out.flags.push((id.to_string(), value));
            continue;
        }
        if let Some((_, id)) = SWITCH_FLAGS.iter().find(|(f, _)| *f == arg) {
            out.flags.push((id.to_string(), None));
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        out.positionals.push(arg.to_string());
    }
    out
}
