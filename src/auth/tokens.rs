//! Opaque bearer tokens. Only the SHA-256 digest is persisted; a token is
//! active while its row exists and revoked once the row is deleted.

use anyhow::Context;
use axum::async_trait;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

pub const TOKEN_NAME: &str = "auth_token";
const TOKEN_LEN: usize = 40;

/// A token that resolved to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveToken {
    pub id: Uuid,
    pub user_id: Uuid,
}

#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Returns the plaintext; it is not recoverable afterwards.
    async fn issue(&self, user_id: Uuid) -> anyhow::Result<String>;
    async fn resolve(&self, plaintext: &str) -> anyhow::Result<Option<ActiveToken>>;
    async fn revoke(&self, token_id: Uuid) -> anyhow::Result<()>;
}

pub fn generate_plaintext() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub fn digest(plaintext: &str) -> String {
    format!("{:x}", Sha256::digest(plaintext.as_bytes()))
}

#[derive(Clone)]
pub struct PgTokenIssuer {
    db: PgPool,
}

impl PgTokenIssuer {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenIssuer for PgTokenIssuer {
    async fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        let plaintext = generate_plaintext();
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO personal_access_tokens (user_id, name, token_hash)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(TOKEN_NAME)
        .bind(digest(&plaintext))
        .fetch_one(&self.db)
        .await
        .context("insert access token")?;
        debug!(%user_id, token_id = %id, "access token issued");
        Ok(plaintext)
    }

    async fn resolve(&self, plaintext: &str) -> anyhow::Result<Option<ActiveToken>> {
        let row = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            UPDATE personal_access_tokens
               SET last_used_at = now()
             WHERE token_hash = $1
            RETURNING id, user_id
            "#,
        )
        .bind(digest(plaintext))
        .fetch_optional(&self.db)
        .await
        .context("resolve access token")?;
        Ok(row.map(|(id, user_id)| ActiveToken { id, user_id }))
    }

    async fn revoke(&self, token_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM personal_access_tokens WHERE id = $1")
            .bind(token_id)
            .execute(&self.db)
            .await
            .context("delete access token")?;
        debug!(%token_id, "access token revoked");
        Ok(())
    }
}
