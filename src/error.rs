use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::borrow::Cow;

use serde_json::{json, Map, Value};

pub const INVALID_CREDENTIALS: &str = "The provided credentials are incorrect.";
pub const EMAIL_TAKEN: &str = "The email has already been taken.";

/// Field-level validation failures, in the order they were found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    entries: Vec<(Cow<'static, str>, String)>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<Cow<'static, str>>, message: impl Into<String>) {
        self.entries.push((field.into(), message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn has(&self, field: &str) -> bool {
        self.entries.iter().any(|(f, _)| f == field)
    }

    #[cfg(test)]
    pub fn messages(&self, field: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(f, _)| f == field)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    /// Summary line: the first message plus a count of the rest.
    pub fn summary(&self) -> String {
        let Some((_, first)) = self.entries.first() else {
            return "The given data was invalid.".into();
        };
        match self.entries.len() - 1 {
            0 => first.clone(),
            1 => format!("{first} (and 1 more error)"),
            n => format!("{first} (and {n} more errors)"),
        }
    }

    fn to_json(&self) -> Value {
        let mut fields = Map::new();
        for (field, message) in &self.entries {
            let slot = fields
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(list) = slot {
                list.push(Value::String(message.clone()));
            }
        }
        Value::Object(fields)
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed: {}", .0.summary())]
    Validation(ValidationErrors),

    #[error("email already registered")]
    Conflict,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("Unauthenticated.")]
    Unauthenticated,

    #[error("malformed request body: {0}")]
    BadRequest(String),

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::Validation(errors)
    }
}

fn unprocessable(errors: &ValidationErrors) -> (StatusCode, Value) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        json!({ "message": errors.summary(), "errors": errors.to_json() }),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation(errors) => unprocessable(errors),
            AppError::Conflict => unprocessable(&ValidationErrors::single("email", EMAIL_TAKEN)),
            AppError::InvalidCredentials => {
                unprocessable(&ValidationErrors::single("email", INVALID_CREDENTIALS))
            }
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": "Unauthenticated.", "error": "authentication_required" }),
            ),
            AppError::BadRequest(detail) => {
                tracing::debug!(%detail, "rejected request body");
                (
                    StatusCode::BAD_REQUEST,
                    json!({ "message": "The request body could not be parsed." }),
                )
            }
            AppError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                json!({ "message": "The request body is too large." }),
            ),
            AppError::Storage(e) => {
                tracing::error!(error = ?e, "storage error");
                server_error()
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                server_error()
            }
        };

        (status, Json(body)).into_response()
    }
}

fn server_error() -> (StatusCode, Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "message": "Server Error" }),
    )
}
