//! `profilekit seed`: creates the super admin account. The only way a
//! `super_admin` role comes into existence.

use anyhow::Context;
use time::macros::date;
use tracing::info;

use crate::auth::{
    password::PasswordHasher,
    repo::{RepoError, UserStore},
    repo_types::{NewUser, Role},
};

#[derive(Debug, Clone)]
pub struct SeedAdmin {
    pub email: String,
    pub password: String,
}

impl SeedAdmin {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            email: std::env::var("SEED_ADMIN_EMAIL")
                .unwrap_or_else(|_| "superadmin@test.com".into())
                .trim()
                .to_lowercase(),
            password: std::env::var("SEED_ADMIN_PASSWORD")
                .context("SEED_ADMIN_PASSWORD must be set to seed the super admin")?,
        })
    }
}

/// Returns `false` when the account already exists.
pub async fn seed_super_admin(
    users: &dyn UserStore,
    hasher: &dyn PasswordHasher,
    admin: SeedAdmin,
) -> anyhow::Result<bool> {
    if users.find_by_email(&admin.email).await?.is_some() {
        info!(email = %admin.email, "super admin already present");
        return Ok(false);
    }

    let created = users
        .create(NewUser {
            first_name: "Super".into(),
            last_name: "Admin".into(),
            email: admin.email.clone(),
            contact_number: "1234567890".into(),
            dob: date!(1990 - 01 - 01),
            password_hash: hasher.hash(&admin.password)?,
            role: Role::SuperAdmin,
            profile_image: None,
        })
        .await;

    match created {
        Ok(user) => {
            info!(user_id = %user.id, email = %user.email, "super admin seeded");
            Ok(true)
        }
        // lost a race with another seeder
        Err(RepoError::DuplicateEmail) => Ok(false),
        Err(RepoError::Other(e)) => Err(e),
    }
}
