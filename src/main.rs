mod app;
mod auth;
mod config;
mod error;
mod images;
mod seed;
mod state;
mod storage;

use crate::auth::{password::Argon2Hasher, repo::PgUserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "profilekit=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;

    // Run migrations if present
    if let Err(e) = sqlx::migrate!("./migrations").run(&app_state.db).await {
        tracing::warn!(error = %e, "migration failed; continuing");
    }

    if std::env::args().nth(1).as_deref() == Some("seed") {
        let users = PgUserStore::new(app_state.db.clone());
        seed::seed_super_admin(&users, &Argon2Hasher::default(), seed::SeedAdmin::from_env()?)
            .await?;
        return Ok(());
    }

    app::serve(app::build_app(app_state)).await
}
