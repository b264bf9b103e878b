//! In-process stores backing the service and router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use axum::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::{RepoError, UserStore};
use super::repo_types::{NewUser, ProfileChanges, User};
use super::tokens::{digest, generate_plaintext, ActiveToken, TokenIssuer};

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
    /// Makes `clear_profile_image` fail, as a lost connection would.
    pub fail_writes: AtomicBool,
}

impl MemoryUserStore {
    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    fn email_taken(users: &HashMap<Uuid, User>, email: &str, except: Option<Uuid>) -> bool {
        users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser) -> Result<User, RepoError> {
        let mut users = self.users.lock().unwrap();
        if Self::email_taken(&users, &new.email, None) {
            return Err(RepoError::DuplicateEmail);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            contact_number: new.contact_number,
            dob: new.dob,
            password_hash: new.password_hash,
            role: new.role,
            profile_image: new.profile_image,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<User, RepoError> {
        let mut users = self.users.lock().unwrap();
        if let Some(email) = &changes.email {
            if Self::email_taken(&users, email, Some(id)) {
                return Err(RepoError::DuplicateEmail);
            }
        }
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("user {id} not found"))?;
        let c = changes.clone();
        if let Some(v) = c.first_name {
            user.first_name = v;
        }
        if let Some(v) = c.last_name {
            user.last_name = v;
        }
        if let Some(v) = c.email {
            user.email = v;
        }
        if let Some(v) = c.contact_number {
            user.contact_number = v;
        }
        if let Some(v) = c.dob {
            user.dob = v;
        }
        if let Some(v) = c.profile_image {
            user.profile_image = Some(v);
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn clear_profile_image(&self, id: Uuid) -> anyhow::Result<User> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("user {id} not found"))?;
        user.profile_image = None;
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }
}

#[derive(Default)]
pub struct MemoryTokenIssuer {
    // digest -> token
    tokens: Mutex<HashMap<String, ActiveToken>>,
}

impl MemoryTokenIssuer {
    pub fn count_for(&self, user_id: Uuid) -> usize {
        self.tokens
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl TokenIssuer for MemoryTokenIssuer {
    async fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        let plaintext = generate_plaintext();
        let token = ActiveToken {
            id: Uuid::new_v4(),
            user_id,
        };
        self.tokens.lock().unwrap().insert(digest(&plaintext), token);
        Ok(plaintext)
    }

    async fn resolve(&self, plaintext: &str) -> anyhow::Result<Option<ActiveToken>> {
        Ok(self.tokens.lock().unwrap().get(&digest(plaintext)).copied())
    }

    async fn revoke(&self, token_id: Uuid) -> anyhow::Result<()> {
        self.tokens.lock().unwrap().retain(|_, t| t.id != token_id);
        Ok(())
    }
}
