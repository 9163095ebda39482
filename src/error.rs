//! Error types for the awx-cli crate.

use std::fmt;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Classification of a non-success, non-401 API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    BadRequest,
    Duplicate,
    Forbidden,
    LicenseInvalid,
    NotFound,
    MethodNotAllowed,
    Conflict,
    PaymentRequired,
    InternalServerError,
    BadGateway,
    Unknown,
}

impl ApiErrorKind {
    /// Pick a kind from the status code, refining 400/403 by the body text.
    pub fn classify(status: StatusCode, text: &str) -> Self {
        let license_invalid = ["Invalid license", "eula_accepted", "Invalid license data"]
            .iter()
            .any(|needle| text.contains(needle));

        match status {
            StatusCode::BAD_REQUEST if license_invalid => Self::LicenseInvalid,
            StatusCode::BAD_REQUEST if text.contains("already exists") => Self::Duplicate,
            StatusCode::BAD_REQUEST => Self::BadRequest,
            StatusCode::FORBIDDEN if license_invalid => Self::LicenseInvalid,
            StatusCode::FORBIDDEN => Self::Forbidden,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::METHOD_NOT_ALLOWED => Self::MethodNotAllowed,
            StatusCode::CONFLICT => Self::Conflict,
            StatusCode::PAYMENT_REQUIRED => Self::PaymentRequired,
            StatusCode::INTERNAL_SERVER_ERROR => Self::InternalServerError,
            StatusCode::BAD_GATEWAY => Self::BadGateway,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::Duplicate => "Duplicate",
            Self::Forbidden => "Forbidden",
            Self::LicenseInvalid => "LicenseInvalid",
            Self::NotFound => "NotFound",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::Conflict => "Conflict",
            Self::PaymentRequired => "PaymentRequired",
            Self::InternalServerError => "InternalServerError",
            Self::BadGateway => "BadGateway",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything that can stop a CLI invocation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CliError {
    #[error("could not connect to {host}")]
    Connectivity {
        host: String,
        ssl: bool,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP 401: valid credentials were not provided")]
    Unauthorized { body: Value },

    #[error("{kind} ({status}) received")]
    Api {
        kind: ApiErrorKind,
        status: StatusCode,
        body: Value,
    },

    #[error("{0}")]
    Validation(String),

    #[error("{value} is not valid JSON or YAML")]
    InvalidJsonOrYaml { value: String },

    #[error("failed to read file: {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed")]
    RequestFailed(#[source] reqwest::Error),

    #[error("failed to read response body")]
    ResponseRead(#[source] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Usage(#[from] clap::Error),

    #[error("interrupted")]
    Interrupted,
}

impl CliError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(e) => e.exit_code(),
            _ => 1,
        }
    }
}

/// Walk a reqwest error's source chain looking for a TLS/certificate failure.
pub(crate) fn is_ssl_failure(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        let text = e.to_string().to_lowercase();
        if ["certificate", "ssl", "tls", "handshake"]
            .iter()
            .any(|needle| text.contains(needle))
        {
            return true;
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_maps_plain_status_codes() {
        assert_eq!(
            ApiErrorKind::classify(StatusCode::NOT_FOUND, ""),
            ApiErrorKind::NotFound
        );
        assert_eq!(
            ApiErrorKind::classify(StatusCode::CONFLICT, ""),
            ApiErrorKind::Conflict
        );
        assert_eq!(
            ApiErrorKind::classify(StatusCode::IM_A_TEAPOT, ""),
            ApiErrorKind::Unknown
        );
    }

    #[test]
    fn classify_refines_bad_request_by_body() {
        assert_eq!(
            ApiErrorKind::classify(
                StatusCode::BAD_REQUEST,
                r#"{"name":["Organization with this Name already exists."]}"#
            ),
            ApiErrorKind::Duplicate
        );
        assert_eq!(
            ApiErrorKind::classify(StatusCode::BAD_REQUEST, r#"{"name":["required"]}"#),
            ApiErrorKind::BadRequest
        );
        assert_eq!(
            ApiErrorKind::classify(StatusCode::FORBIDDEN, "Invalid license"),
            ApiErrorKind::LicenseInvalid
        );
    }

    #[test]
    fn api_error_display_names_kind_and_status() {
        let err = CliError::Api {
            kind: ApiErrorKind::BadRequest,
            status: StatusCode::BAD_REQUEST,
            body: json!({}),
        };
        assert_eq!(err.to_string(), "BadRequest (400 Bad Request) received");
    }

    #[test]
    fn exit_code_is_one_for_runtime_failures() {
        assert_eq!(CliError::validation("nope").exit_code(), 1);
        assert_eq!(CliError::Interrupted.exit_code(), 1);
        assert_eq!(
            CliError::Unauthorized { body: Value::Null }.exit_code(),
            1
        );
    }
}
