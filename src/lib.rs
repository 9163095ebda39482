//! Build a command-line client at runtime from an AWX-style REST API.
//!
//! The API root lists the resources; an OPTIONS request per resource
//! describes its fields. From that metadata a clap `Command` tree is built,
//! parsed matches are dispatched as HTTP requests, and responses are
//! rendered as json, yaml, jq-filtered lines or a human table.
//!
//! # Usage
//!
//! ```no_run
//! use awx_cli::{ActionRegistry, ApiRoot, CliConfig, Connection, GrammarBuilder, RoleCache, Selection};
//!
//! let conn = Connection::new("https://awx.example.com", false).unwrap();
//! let root = ApiRoot::discover(&conn).unwrap();
//! let registry = ActionRegistry::default();
//! let roles = RoleCache::new(&conn, &root);
//! let builder = GrammarBuilder {
//!     conn: &conn,
//!     root: &root,
//!     registry: &registry,
//!     roles: &roles,
//! };
//!
//! let selected = Selection { resource: "organizations", action: Some("list") };
//! let cmd = builder.build(&CliConfig::default(), Some(selected)).unwrap();
//! ```

pub mod arguments;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod custom;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod grammar;
pub mod logging;
pub mod monitor;
pub mod options;
pub mod resources;

pub use arguments::{Action, FlagSpec, IdRef};
pub use cli::{run, run_with};
pub use client::{Auth, Connection, Page};
pub use config::{Env, Settings};
pub use custom::{ActionContext, ActionRegistry, CustomAction, Kwargs, RoleCache};
pub use dispatch::{dispatch, Body, Response};
pub use error::{ApiErrorKind, CliError};
pub use format::{format_response, Format};
pub use grammar::{CliConfig, GrammarBuilder, Selection};
pub use options::{FieldMeta, FieldType, HttpMethod, OptionsSchema};
pub use resources::ApiRoot;

// Re-export dependencies for downstream crates
pub use clap;
pub use reqwest;
