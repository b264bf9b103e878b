use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, CurrentUserResponse, LoginRequest, MessageResponse, ProfileResponse,
            RegisterRequest, UpdateProfileRequest,
        },
        extractors::{AuthUser, FormPayload},
        validation::{validate_login, validate_profile_update, validate_registration},
    },
    error::AppError,
    state::AppState,
};

/// Room for a 5 MiB image plus form overhead.
const UPLOAD_BODY_LIMIT: usize = 6 * 1024 * 1024;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/user", get(current_user))
        .route(
            "/profile",
            post(update_profile).put(update_profile).patch(update_profile),
        )
        .route("/profile/image", delete(delete_profile_image))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    payload: FormPayload<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let (registration, image) = validate_registration(payload.fields, payload.image)?;
    let session = state.auth.register(registration, image).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully",
            user: session.user,
            token: session.token,
        }),
    ))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: FormPayload<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let creds = validate_login(payload.fields)?;
    let session = state.auth.login(creds).await?;
    Ok(Json(AuthResponse {
        message: "Login successful",
        user: session.user,
        token: session.token,
    }))
}

#[instrument(skip_all)]
pub async fn current_user(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Json<CurrentUserResponse> {
    Json(CurrentUserResponse {
        user: state.auth.current_user(principal),
    })
}

#[instrument(skip_all)]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    payload: FormPayload<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    let (changes, image) = validate_profile_update(payload.fields, payload.image)?;
    let user = state.auth.update_profile(principal, changes, image).await?;
    Ok(Json(ProfileResponse {
        message: "Profile updated successfully",
        user,
    }))
}

#[instrument(skip_all)]
pub async fn delete_profile_image(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = state.auth.delete_profile_image(principal).await?;
    Ok(Json(ProfileResponse {
        message: "Profile image deleted successfully",
        user,
    }))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<MessageResponse>, AppError> {
    state.auth.logout(principal).await?;
    Ok(Json(MessageResponse {
        message: "Logged out successfully",
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::UPLOAD_BODY_LIMIT;
    use crate::{app::build_app, images::services::fixtures::PNG, state::AppState};

    const BOUNDARY: &str = "XBOUNDARYX";

    fn app() -> (Router, std::sync::Arc<crate::storage::memory::MemoryDisk>) {
        let (state, disk) = AppState::fake();
        (build_app(state), disk)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn json_req(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut b = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            b = b.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        b.body(Body::from(body.to_string())).unwrap()
    }

    fn bare_req(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut b = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            b = b.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        b.body(Body::empty()).unwrap()
    }

    fn multipart_req(
        method: Method,
        uri: &str,
        token: Option<&str>,
        fields: &[(&str, &str)],
        file: Option<(&str, &[u8])>,
    ) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((filename, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"profile_image\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let mut b = Request::builder().method(method).uri(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(t) = token {
            b = b.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        b.body(Body::from(body)).unwrap()
    }

    fn registration(email: &str) -> Value {
        json!({
            "first_name": "A",
            "last_name": "B",
            "email": email,
            "contact_number": "123",
            "dob": "1990-01-01",
            "password": "password1",
            "password_confirmation": "password1"
        })
    }

    async fn register(app: &Router, email: &str) -> (String, Value) {
        let (status, body) =
            send(app, json_req(Method::POST, "/api/register", None, registration(email))).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (body["token"].as_str().unwrap().to_string(), body["user"].clone())
    }

    #[tokio::test]
    async fn register_example_returns_created_user_and_token() {
        let (app, _) = app();
        let (status, body) = send(
            &app,
            json_req(Method::POST, "/api/register", None, registration("a@b.com")),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "User registered successfully");
        assert_eq!(body["user"]["role"], "user");
        assert_eq!(body["user"]["full_name"], "A B");
        assert_eq!(body["user"]["dob"], "1990-01-01");
        assert!(body["user"]["profile_image"].is_null());
        assert!(body["user"]["profile_image_url"].is_null());
        assert!(body["user"].get("password").is_none());
        assert!(body["user"].get("password_hash").is_none());
        assert!(!body["token"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_validation_and_conflict_are_422() {
        let (app, _) = app();
        let (status, body) =
            send(&app, json_req(Method::POST, "/api/register", None, json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"]["first_name"][0], "The first name field is required.");

        register(&app, "a@b.com").await;
        let (status, body) = send(
            &app,
            json_req(Method::POST, "/api/register", None, registration("A@B.com")),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"]["email"][0], "The email has already been taken.");
    }

    #[tokio::test]
    async fn register_via_multipart_with_image() {
        let (app, disk) = app();
        let (status, body) = send(
            &app,
            multipart_req(
                Method::POST,
                "/api/register",
                None,
                &[
                    ("first_name", "A"),
                    ("last_name", "B"),
                    ("email", "a@b.com"),
                    ("contact_number", "123"),
                    ("dob", "1990-01-01"),
                    ("password", "password1"),
                    ("password_confirmation", "password1"),
                    ("role", "admin"),
                ],
                Some(("me.png", PNG)),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["user"]["role"], "admin");
        let path = body["user"]["profile_image"].as_str().unwrap();
        assert!(path.starts_with("profile-images/") && path.ends_with(".png"));
        assert_eq!(
            body["user"]["profile_image_url"],
            format!("http://localhost:8080/storage/{path}")
        );
        assert!(disk.contains(path));
    }

    #[tokio::test]
    async fn login_failures_share_one_message() {
        let (app, _) = app();
        register(&app, "a@b.com").await;

        let (s1, wrong_pw) = send(
            &app,
            json_req(
                Method::POST,
                "/api/login",
                None,
                json!({ "email": "a@b.com", "password": "not-it-at-all" }),
            ),
        )
        .await;
        let (s2, unknown) = send(
            &app,
            json_req(
                Method::POST,
                "/api/login",
                None,
                json!({ "email": "nobody@b.com", "password": "password1" }),
            ),
        )
        .await;

        assert_eq!(s1, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(s2, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(wrong_pw, unknown);
        assert_eq!(wrong_pw["message"], "The provided credentials are incorrect.");
    }

    #[tokio::test]
    async fn login_then_fetch_current_user() {
        let (app, _) = app();
        register(&app, "a@b.com").await;

        let (status, body) = send(
            &app,
            json_req(
                Method::POST,
                "/api/login",
                None,
                json!({ "email": "a@b.com", "password": "password1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Login successful");
        let token = body["token"].as_str().unwrap();

        let (status, body) = send(&app, bare_req(Method::GET, "/api/user", Some(token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "a@b.com");
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let (app, _) = app();
        for (method, uri) in [
            (Method::GET, "/api/user"),
            (Method::PATCH, "/api/profile"),
            (Method::DELETE, "/api/profile/image"),
            (Method::POST, "/api/logout"),
        ] {
            let (status, body) = send(&app, bare_req(method.clone(), uri, None)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
            assert_eq!(
                body,
                json!({ "message": "Unauthenticated.", "error": "authentication_required" })
            );
        }

        let (status, _) = send(&app, bare_req(Method::GET, "/api/user", Some("garbage"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_revokes_only_that_token() {
        let (app, _) = app();
        let (first, _) = register(&app, "a@b.com").await;
        let (_, body) = send(
            &app,
            json_req(
                Method::POST,
                "/api/login",
                None,
                json!({ "email": "a@b.com", "password": "password1" }),
            ),
        )
        .await;
        let second = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(&app, bare_req(Method::POST, "/api/logout", Some(&second))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Logged out successfully" }));

        let (status, _) = send(&app, bare_req(Method::GET, "/api/user", Some(&second))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, bare_req(Method::GET, "/api/user", Some(&first))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn update_profile_fields_and_image() {
        let (app, disk) = app();
        let (token, _) = register(&app, "a@b.com").await;

        let (status, body) = send(
            &app,
            json_req(
                Method::PATCH,
                "/api/profile",
                Some(&token),
                json!({ "first_name": "Zed", "email": "a@b.com" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["message"], "Profile updated successfully");
        assert_eq!(body["user"]["full_name"], "Zed B");
        assert!(body["user"]["profile_image"].is_null());

        let (status, body) = send(
            &app,
            multipart_req(Method::POST, "/api/profile", Some(&token), &[], Some(("a.png", PNG))),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let first = body["user"]["profile_image"].as_str().unwrap().to_string();

        let (_, body) = send(
            &app,
            multipart_req(Method::POST, "/api/profile", Some(&token), &[], Some(("b.png", PNG))),
        )
        .await;
        let second = body["user"]["profile_image"].as_str().unwrap().to_string();

        assert_ne!(first, second);
        assert!(!disk.contains(&first));
        assert!(disk.contains(&second));
        assert_eq!(disk.paths(), vec![second]);
    }

    #[tokio::test]
    async fn update_profile_rejects_taken_email_and_bad_image() {
        let (app, _) = app();
        register(&app, "other@b.com").await;
        let (token, _) = register(&app, "me@b.com").await;

        let (status, body) = send(
            &app,
            json_req(
                Method::PUT,
                "/api/profile",
                Some(&token),
                json!({ "email": "other@b.com" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"]["email"][0], "The email has already been taken.");

        let (status, body) = send(
            &app,
            multipart_req(
                Method::POST,
                "/api/profile",
                Some(&token),
                &[],
                Some(("notes.txt", &b"hello"[..])),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"]["profile_image"][0], "The profile image field must be an image.");
    }

    #[tokio::test]
    async fn delete_profile_image_twice() {
        let (app, disk) = app();
        let (token, _) = register(&app, "a@b.com").await;
        send(
            &app,
            multipart_req(Method::POST, "/api/profile", Some(&token), &[], Some(("a.png", PNG))),
        )
        .await;
        assert_eq!(disk.paths().len(), 1);

        for _ in 0..2 {
            let (status, body) =
                send(&app, bare_req(Method::DELETE, "/api/profile/image", Some(&token))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["message"], "Profile image deleted successfully");
            assert!(body["user"]["profile_image"].is_null());
            assert!(body["user"]["profile_image_url"].is_null());
        }
        assert!(disk.paths().is_empty());
    }

    fn raw_req(uri: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type)
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn undecodable_bodies_answer_in_json() {
        let (app, _) = app();

        let (status, body) = send(
            &app,
            raw_req("/api/register", "application/json", r#"{"first_name": 5}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body["errors"]["first_name"],
            json!(["The first name field must be a string."])
        );
        assert!(body["message"].is_string());

        let (status, body) =
            send(&app, raw_req("/api/register", "application/json", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "message": "The request body could not be parsed." }));

        let (status, body) =
            send(&app, raw_req("/api/login", "application/json", "[1, 2]")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn oversized_body_is_413_json() {
        let (app, _) = app();
        let padding = "x".repeat(UPLOAD_BODY_LIMIT + 1);
        let (status, body) = send(
            &app,
            raw_req(
                "/api/login",
                "application/json",
                format!(r#"{{"email": "{padding}"}}"#),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body, json!({ "message": "The request body is too large." }));
    }

    #[tokio::test]
    async fn urlencoded_forms_are_accepted() {
        let (app, _) = app();
        register(&app, "a@b.com").await;

        let (status, body) = send(
            &app,
            raw_req(
                "/api/login",
                "application/x-www-form-urlencoded",
                "email=a%40b.com&password=password1",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["user"]["email"], "a@b.com");

        let (status, body) = send(
            &app,
            raw_req(
                "/api/login",
                "application/x-www-form-urlencoded",
                "email=a%40b.com&password=x",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "The provided credentials are incorrect.");
    }

    #[tokio::test]
    async fn health_check() {
        let (app, _) = app();
        let res = app.oneshot(bare_req(Method::GET, "/up", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
