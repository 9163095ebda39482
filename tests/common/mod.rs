//! Mock API shared by the end-to-end tests.
#![allow(dead_code)]

use awx_cli::{run_with, Env};
use mockito::{Mock, Server, ServerGuard};
use serde_json::{json, Value};

pub struct Api {
    pub server: ServerGuard,
    _mocks: Vec<Mock>,
}

impl Api {
    /// API root listing `resources`, each with an OPTIONS body.
    pub fn new(resources: &[(&str, Value)]) -> Self {
        let mut server = Server::new();
        let mut mocks = vec![server
            .mock("GET", "/api/")
            .with_status(200)
            .with_body(r#"{"current_version":"/api/v2/"}"#)
            .create()];

        let mut root = serde_json::Map::new();
        for (name, _) in resources {
            root.insert(name.to_string(), json!(format!("/api/v2/{name}/")));
        }
        mocks.push(
            server
                .mock("GET", "/api/v2/")
                .with_status(200)
                .with_body(Value::Object(root).to_string())
                .create(),
        );
        for (name, options) in resources {
            mocks.push(
                server
                    .mock("OPTIONS", format!("/api/v2/{name}/").as_str())
                    .with_status(200)
                    .with_body(options.to_string())
                    .create(),
            );
        }
        Self {
            server,
            _mocks: mocks,
        }
    }

    pub fn run(&self, args: &[&str]) -> (i32, String, String) {
        self.run_with_env(&[], args)
    }

    /// Run against this server; `extra` overrides the default environment.
    pub fn run_with_env(&self, extra: &[(&str, &str)], args: &[&str]) -> (i32, String, String) {
        let defaults = [
            ("CONTROLLER_HOST", self.server.url()),
            ("CONTROLLER_OAUTH_TOKEN", "secret-token".to_string()),
            ("CONTROLLER_COLOR", "false".to_string()),
        ];
        let env = Env::from_pairs(
            defaults
                .into_iter()
                .chain(extra.iter().map(|(k, v)| (*k, v.to_string()))),
        );
        let argv = std::iter::once("awx").chain(args.iter().copied());
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run_with(argv, &env, &mut std::io::empty(), &mut stdout, &mut stderr);
        (
            code,
            String::from_utf8(stdout).unwrap(),
            String::from_utf8(stderr).unwrap(),
        )
    }
}

pub fn organizations_options() -> Value {
    json!({"actions": {
        "GET": {"name": {"type": "string"}, "description": {"type": "string"}},
        "POST": {
            "name": {"type": "string", "required": true},
            "description": {"type": "string"}
        }
    }})
}
