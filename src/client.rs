//! Blocking HTTP access to the API.
//!
//! `Connection` owns the reqwest client, the host and the credentials.
//! `Page` is a cheap handle pairing a connection with one endpoint, the
//! unit every schema fetch, dispatch and custom action works against.
//!
//! A 204 is a successful response with no body, never an error.

use std::fmt::Display;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ALLOW, WARNING};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{is_ssl_failure, ApiErrorKind, CliError, Result};

/// Query string pairs.
pub type Query = Vec<(String, String)>;

/// Credentials attached to every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    #[default]
    None,
    Token(String),
    Basic { username: String, password: String },
}

impl Auth {
    fn apply(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::None => req,
            Self::Token(token) => req.bearer_auth(token),
            Self::Basic { username, password } => req.basic_auth(username, Some(password)),
        }
    }
}

/// A decoded HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    /// Methods listed in the `Allow` header.
    pub allow: Vec<String>,
    /// The server flagged the endpoint as deprecated (`Warning: 299 ... deprecated`).
    pub deprecated: bool,
    /// Parsed JSON body; `None` for 204 and empty bodies.
    pub body: Option<Value>,
    pub text: String,
}

impl ApiResponse {
    fn read(resp: Response) -> Result<Self> {
        let status = resp.status();
        let headers = resp.headers();
        let allow = headers
            .get(ALLOW)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(|m| m.trim().to_uppercase())
                    .filter(|m| !m.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let deprecated = headers
            .get(WARNING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|w| w.contains("299") && w.contains("deprecated"));

        let text = resp.text().map_err(CliError::ResponseRead)?;
        let body = if text.trim().is_empty() || status == StatusCode::NO_CONTENT {
            None
        } else {
            Some(serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone())))
        };

        Ok(Self {
            status,
            allow,
            deprecated,
            body,
            text,
        })
    }

    /// Turn 4xx/5xx responses into typed errors.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        let body = self
            .body
            .clone()
            .unwrap_or_else(|| Value::String(self.text.clone()));
        if self.status == StatusCode::UNAUTHORIZED {
            return Err(CliError::Unauthorized { body });
        }
        Err(CliError::Api {
            kind: ApiErrorKind::classify(self.status, &self.text),
            status: self.status,
            body,
        })
    }

    /// Body as JSON, `null` when there was none.
    pub fn json(&self) -> Value {
        self.body.clone().unwrap_or(Value::Null)
    }
}

/// One HTTP attempt per request; failures surface immediately.
#[derive(Debug, Clone)]
pub struct Connection {
    client: Client,
    host: String,
    auth: Auth,
}

impl Connection {
    pub fn new(host: &str, insecure: bool) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(CliError::RequestFailed)?;
        Ok(Self::with_client(client, host))
    }

    pub fn with_client(client: Client, host: &str) -> Self {
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            auth: Auth::None,
        }
    }

    pub fn login(&mut self, auth: Auth) {
        self.auth = auth;
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Absolute URL for an endpoint path; absolute URLs pass through.
    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if endpoint.starts_with('/') {
            format!("{}{}", self.host, endpoint)
        } else {
            format!("{}/{}", self.host, endpoint)
        }
    }

    /// Send a request without interpreting the status code.
    pub fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        let url = self.url(endpoint);
        let mut req = self.auth.apply(self.client.request(method.clone(), &url));
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        self.send(&method, &url, req)
    }

    /// POST a form with explicit credentials (OAuth2 token endpoint).
    pub fn post_form(
        &self,
        endpoint: &str,
        form: &[(&str, &str)],
        auth: &Auth,
    ) -> Result<ApiResponse> {
        let url = self.url(endpoint);
        let req = auth.apply(self.client.post(&url)).form(form);
        self.send(&Method::POST, &url, req)?.error_for_status()
    }

    /// POST JSON with explicit credentials.
    pub fn post_as(&self, endpoint: &str, body: &Value, auth: &Auth) -> Result<ApiResponse> {
        let url = self.url(endpoint);
        let req = auth.apply(self.client.post(&url)).json(body);
        self.send(&Method::POST, &url, req)?.error_for_status()
    }

    fn send(&self, method: &Method, url: &str, req: RequestBuilder) -> Result<ApiResponse> {
        let resp = req.send().map_err(|e| self.classify(e))?;
        let resp = ApiResponse::read(resp)?;
        debug!(%method, %url, status = resp.status.as_u16(), "request complete");
        if resp.deprecated {
            warn!(%url, "this endpoint is deprecated");
        }
        Ok(resp)
    }

    fn classify(&self, err: reqwest::Error) -> CliError {
        if err.is_connect() || err.is_timeout() {
            CliError::Connectivity {
                host: self.host.clone(),
                ssl: is_ssl_failure(&err),
                source: err,
            }
        } else {
            CliError::RequestFailed(err)
        }
    }

    pub fn get(&self, endpoint: &str, query: &[(String, String)]) -> Result<ApiResponse> {
        self.request(Method::GET, endpoint, query, None)?
            .error_for_status()
    }

    pub fn post(&self, endpoint: &str, body: &Value) -> Result<ApiResponse> {
        self.request(Method::POST, endpoint, &[], Some(body))?
            .error_for_status()
    }

    pub fn patch(&self, endpoint: &str, body: &Value) -> Result<ApiResponse> {
        self.request(Method::PATCH, endpoint, &[], Some(body))?
            .error_for_status()
    }

    pub fn delete(&self, endpoint: &str) -> Result<ApiResponse> {
        self.request(Method::DELETE, endpoint, &[], None)?
            .error_for_status()
    }

    pub fn options(&self, endpoint: &str) -> Result<ApiResponse> {
        self.request(Method::OPTIONS, endpoint, &[], None)?
            .error_for_status()
    }
}

/// A connection bound to one endpoint.
#[derive(Debug, Clone)]
pub struct Page<'a> {
    conn: &'a Connection,
    endpoint: String,
}

impl<'a> Page<'a> {
    pub fn new(conn: &'a Connection, endpoint: impl Into<String>) -> Self {
        Self {
            conn,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    /// Child endpoint: `<endpoint><segment>/`.
    pub fn join(&self, segment: impl Display) -> Page<'a> {
        let base = if self.endpoint.ends_with('/') {
            self.endpoint.clone()
        } else {
            format!("{}/", self.endpoint)
        };
        Page::new(self.conn, format!("{base}{segment}/"))
    }

    pub fn get(&self, query: &[(String, String)]) -> Result<Value> {
        Ok(self.conn.get(&self.endpoint, query)?.json())
    }

    /// GET every page of a list, following `next` links, merged into one body.
    pub fn get_all(&self, query: &[(String, String)]) -> Result<Value> {
        let mut page = self.get(query)?;
        let mut results: Vec<Value> = take_results(&mut page);
        while let Some(next) = page.get("next").and_then(Value::as_str).map(str::to_string) {
            page = self.conn.get(&next, &[])?.json();
            results.extend(take_results(&mut page));
        }
        if let Some(obj) = page.as_object_mut() {
            obj.insert("count".to_string(), Value::from(results.len()));
            obj.insert("next".to_string(), Value::Null);
            obj.insert("results".to_string(), Value::Array(results));
        }
        Ok(page)
    }

    pub fn post(&self, body: &Value) -> Result<Option<Value>> {
        Ok(self.conn.post(&self.endpoint, body)?.body)
    }

    pub fn patch(&self, body: &Value) -> Result<Option<Value>> {
        Ok(self.conn.patch(&self.endpoint, body)?.body)
    }

    pub fn delete(&self) -> Result<Option<Value>> {
        Ok(self.conn.delete(&self.endpoint)?.body)
    }

    pub fn options(&self) -> Result<ApiResponse> {
        self.conn.options(&self.endpoint)
    }

    /// Follow `related.<name>` of this object, falling back to `<endpoint><name>/`.
    pub fn related(&self, name: &str) -> Result<Page<'a>> {
        let detail = self.get(&[])?;
        Ok(related_page(self, &detail, name))
    }
}

/// `related.<name>` of an already fetched object.
pub fn related_page<'a>(page: &Page<'a>, detail: &Value, name: &str) -> Page<'a> {
    match detail
        .get("related")
        .and_then(|r| r.get(name))
        .and_then(Value::as_str)
    {
        Some(endpoint) => Page::new(page.connection(), endpoint),
        None => page.join(name),
    }
}

fn take_results(page: &mut Value) -> Vec<Value> {
    match page.get_mut("results").map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Render a JSON scalar as a query-string value.
pub fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
