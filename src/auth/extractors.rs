use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Multipart, Request},
    http::{header::CONTENT_TYPE, request::Parts, StatusCode},
    Form,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::auth::services::Principal;
use crate::auth::validation::label;
use crate::error::{AppError, ValidationErrors};
use crate::images::services::ImageUpload;
use crate::state::AppState;

const IMAGE_FIELD: &str = "profile_image";

/// Resolves the bearer token to its user; rejects with 401 otherwise.
pub struct AuthUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AppError::Unauthenticated)?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::Unauthenticated)?;

        let principal = state.auth.authenticate(token).await.map_err(|e| {
            if matches!(e, AppError::Unauthenticated) {
                warn!("invalid or revoked token");
            }
            e
        })?;
        Ok(AuthUser(principal))
    }
}

/// Form fields plus the optional `profile_image` file, from a JSON,
/// urlencoded or `multipart/form-data` body. An empty body yields `T::default()`.
pub struct FormPayload<T> {
    pub fields: T,
    pub image: Option<ImageUpload>,
}

#[async_trait]
impl<T> FromRequest<AppState> for FormPayload<T>
where
    T: DeserializeOwned + Default + Send + 'static,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| body_error(e.status(), e.body_text()))?;
            return read_multipart(multipart).await;
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| body_error(e.status(), e.body_text()))?;
            let fields = pairs
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            return Ok(Self {
                fields: decode_fields(fields)?,
                image: None,
            });
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| body_error(e.status(), e.body_text()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self {
                fields: T::default(),
                image: None,
            });
        }
        let fields = match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => return Err(AppError::BadRequest("body is not a JSON object".into())),
            Err(e) => return Err(AppError::BadRequest(e.to_string())),
        };
        Ok(Self {
            fields: decode_fields(fields)?,
            image: None,
        })
    }
}

fn body_error(status: StatusCode, detail: String) -> AppError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::BadRequest(detail)
    }
}

/// True when `T` has a string field named `key`. Unknown keys are ignored
/// by serde, so only a declared field fails on a non-string value.
fn declares_field<T: DeserializeOwned>(key: &str) -> bool {
    let mut single = Map::new();
    single.insert(key.to_string(), Value::Bool(true));
    serde_json::from_value::<T>(Value::Object(single)).is_err()
}

/// Every request field is text. A number, boolean, array or object sent for
/// a declared field is a validation error rather than a decode failure.
fn decode_fields<T: DeserializeOwned>(fields: Map<String, Value>) -> Result<T, AppError> {
    let mut errors = ValidationErrors::new();
    let mut text = Map::new();
    for (key, value) in fields {
        match value {
            Value::String(_) | Value::Null => {
                text.insert(key, value);
            }
            _ if declares_field::<T>(&key) => {
                let message = format!("The {} field must be a string.", label(&key));
                errors.add(key, message);
            }
            _ => {}
        }
    }
    errors.into_result()?;

    serde_json::from_value(Value::Object(text))
        .map_err(|e| AppError::BadRequest(format!("decode form fields: {e}")))
}

async fn read_multipart<T: DeserializeOwned>(mut mp: Multipart) -> Result<FormPayload<T>, AppError> {
    let mut fields = Map::new();
    let mut image = None;

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| body_error(e.status(), e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == IMAGE_FIELD {
            let original_name = field.file_name().unwrap_or_default().to_string();
            let body = field
                .bytes()
                .await
                .map_err(|e| body_error(e.status(), e.body_text()))?;
            // browsers send an empty part when no file was picked
            if original_name.is_empty() && body.is_empty() {
                continue;
            }
            image = Some(ImageUpload {
                original_name,
                body,
            });
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| body_error(e.status(), e.body_text()))?;
            fields.insert(name, Value::String(text));
        }
    }

    Ok(FormPayload {
        fields: decode_fields(fields)?,
        image,
    })
}
