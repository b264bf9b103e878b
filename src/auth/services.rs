use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::auth::{
    dto::UserResponse,
    password::PasswordHasher,
    repo::UserStore,
    repo_types::{NewUser, ProfileChanges, User},
    tokens::{ActiveToken, TokenIssuer},
    validation::{Credentials, Registration},
};
use crate::error::AppError;
use crate::images::services::{store_profile_image, ProfileImage};
use crate::storage::FileStore;

/// A user together with a freshly issued bearer token.
#[derive(Debug)]
pub struct Session {
    pub user: UserResponse,
    pub token: String,
}

/// The request principal, resolved from a bearer token.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub token: ActiveToken,
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenIssuer>,
    files: Arc<dyn FileStore>,
    app_url: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenIssuer>,
        files: Arc<dyn FileStore>,
        app_url: impl Into<String>,
    ) -> Self {
        Self {
            users,
            hasher,
            tokens,
            files,
            app_url: app_url.into(),
        }
    }

    pub fn present(&self, user: User) -> UserResponse {
        UserResponse::from_user(user, &self.app_url)
    }

    #[instrument(skip(self, reg, image), fields(email = %reg.email))]
    pub async fn register(
        &self,
        reg: Registration,
        image: Option<ProfileImage>,
    ) -> Result<Session, AppError> {
        let password_hash = self.hasher.hash(&reg.password)?;

        let profile_image = match image {
            Some(image) => Some(
                store_profile_image(self.files.as_ref(), image)
                    .await
                    .map_err(AppError::Storage)?,
            ),
            None => None,
        };

        let created = self
            .users
            .create(NewUser {
                first_name: reg.first_name,
                last_name: reg.last_name,
                email: reg.email,
                contact_number: reg.contact_number,
                dob: reg.dob,
                password_hash,
                role: reg.role,
                profile_image: profile_image.clone(),
            })
            .await;
        let user = match created {
            Ok(user) => user,
            Err(e) => {
                if let Some(path) = &profile_image {
                    self.discard_image(path).await;
                }
                return Err(e.into());
            }
        };

        let token = self.tokens.issue(user.id).await?;
        info!(user_id = %user.id, "user registered");
        Ok(Session {
            user: self.present(user),
            token,
        })
    }

    /// Unknown email and wrong password fail identically.
    #[instrument(skip(self, creds), fields(email = %creds.email))]
    pub async fn login(&self, creds: Credentials) -> Result<Session, AppError> {
        let Some(user) = self.users.find_by_email(&creds.email).await? else {
            // same argon2 cost as a real verify, so timing does not reveal the miss
            let _ = self.hasher.hash(&creds.password);
            warn!("login unknown email");
            return Err(AppError::InvalidCredentials);
        };

        if !self.hasher.verify(&creds.password, &user.password_hash)? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        let token = self.tokens.issue(user.id).await?;
        info!(user_id = %user.id, "user logged in");
        Ok(Session {
            user: self.present(user),
            token,
        })
    }

    /// Resolves a presented bearer token to its owner while the token is active.
    pub async fn authenticate(&self, plaintext: &str) -> Result<Principal, AppError> {
        let token = self
            .tokens
            .resolve(plaintext)
            .await?
            .ok_or(AppError::Unauthenticated)?;
        let user = self
            .users
            .find_by_id(token.user_id)
            .await?
            .ok_or(AppError::Unauthenticated)?;
        Ok(Principal { user, token })
    }

    pub fn current_user(&self, principal: Principal) -> UserResponse {
        self.present(principal.user)
    }

    /// Applies the given fields. A new image replaces the old one, and the old
    /// file is removed only after the row points at the new one.
    #[instrument(skip(self, principal, changes, image), fields(user_id = %principal.user.id))]
    pub async fn update_profile(
        &self,
        principal: Principal,
        mut changes: ProfileChanges,
        image: Option<ProfileImage>,
    ) -> Result<UserResponse, AppError> {
        let user_id = principal.user.id;
        let previous = principal.user.profile_image;

        let replacing = image.is_some();
        if let Some(image) = image {
            let path = store_profile_image(self.files.as_ref(), image)
                .await
                .map_err(AppError::Storage)?;
            changes.profile_image = Some(path);
        }

        let updated = match self.users.update_profile(user_id, &changes).await {
            Ok(user) => user,
            Err(e) => {
                if let Some(path) = &changes.profile_image {
                    self.discard_image(path).await;
                }
                return Err(e.into());
            }
        };

        if replacing {
            if let Some(old) = previous.as_deref() {
                self.discard_image(old).await;
            }
        }

        info!("profile updated");
        Ok(self.present(updated))
    }

    /// Clears the image reference; a user without one is left as is.
    #[instrument(skip(self, principal), fields(user_id = %principal.user.id))]
    pub async fn delete_profile_image(&self, principal: Principal) -> Result<UserResponse, AppError> {
        let user = principal.user;
        let Some(path) = user.profile_image.clone() else {
            return Ok(self.present(user));
        };

        let user = self.users.clear_profile_image(user.id).await?;
        self.discard_image(&path).await;
        info!("profile image deleted");
        Ok(self.present(user))
    }

    /// Revokes only the token that authenticated this request.
    #[instrument(skip(self, principal), fields(user_id = %principal.user.id))]
    pub async fn logout(&self, principal: Principal) -> Result<(), AppError> {
        self.tokens.revoke(principal.token.id).await?;
        info!(token_id = %principal.token.id, "user logged out");
        Ok(())
    }

    /// Best-effort delete: a leftover file must not fail the request.
    async fn discard_image(&self, path: &str) {
        if let Err(e) = self.files.delete(path).await {
            warn!(error = %e, path, "failed to delete profile image");
        }
    }
}
