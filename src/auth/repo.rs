use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, ProfileChanges, User, UserRow};
use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("email already taken")]
    DuplicateEmail,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::DuplicateEmail,
            _ => RepoError::Other(e.into()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::DuplicateEmail => AppError::Conflict,
            RepoError::Other(e) => AppError::Internal(e),
        }
    }
}

/// Persistence of user records. Email uniqueness is enforced by the store itself.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<User, RepoError>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<User, RepoError>;
    async fn clear_profile_image(&self, id: Uuid) -> anyhow::Result<User>;
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, contact_number, dob, \
     password_hash, role, profile_image, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> Result<User, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (first_name, last_name, email, contact_number, dob,
                               password_hash, role, profile_image)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.contact_number)
        .bind(user.dob)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.profile_image)
        .fetch_one(&self.db)
        .await?;
        Ok(User::try_from(row)?)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        row.map(User::try_from).transpose()
    }

    async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<User, RepoError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET first_name     = COALESCE($2, first_name),
                   last_name      = COALESCE($3, last_name),
                   email          = COALESCE($4, email),
                   contact_number = COALESCE($5, contact_number),
                   dob            = COALESCE($6, dob),
                   profile_image  = COALESCE($7, profile_image),
                   updated_at     = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&changes.first_name)
        .bind(&changes.last_name)
        .bind(&changes.email)
        .bind(&changes.contact_number)
        .bind(changes.dob)
        .bind(&changes.profile_image)
        .fetch_one(&self.db)
        .await?;
        Ok(User::try_from(row)?)
    }

    async fn clear_profile_image(&self, id: Uuid) -> anyhow::Result<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET profile_image = NULL, updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(&self.db)
        .await
        .context("clear profile image")?;
        User::try_from(row)
    }
}
