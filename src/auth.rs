//! Accounts, password hashing and bearer-token sessions.

use std::collections::HashMap;

use rand::RngCore;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{CotaskError, CotaskResult};
use crate::feed::{ChangeFeed, ChangeKind, Record};
use crate::ledger::RelationshipLedger;
use crate::logging;
use crate::model::{validate_username, Profile, ResourceKind, Shareable};
use crate::now_secs;
use crate::sharing::Sharing;
use crate::storage::{Credentials, Storage};

const MIN_PASSWORD_LEN: usize = 8;
const SESSION_TOKEN_BYTES: usize = 32;

pub async fn hash_password(password: &str) -> CotaskResult<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| CotaskError::TransientStore(format!("hashing task failed: {e}")))?
        .map_err(|e| CotaskError::TransientStore(format!("bcrypt: {e}")))
}

pub async fn verify_password(password: &str, hash: &str) -> CotaskResult<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| CotaskError::TransientStore(format!("hashing task failed: {e}")))?
        .map_err(|e| CotaskError::TransientStore(format!("bcrypt: {e}")))
}

pub fn validate_password(password: &str) -> CotaskResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CotaskError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Trimmed, lowercased email with a minimal shape check.
pub fn normalize_email(email: &str) -> CotaskResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(CotaskError::validation("email address is not valid"));
    }
    Ok(email)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
}

pub struct Accounts<'a> {
    storage: &'a Storage,
    feed: &'a ChangeFeed,
}

impl<'a> Accounts<'a> {
    pub fn new(storage: &'a Storage, feed: &'a ChangeFeed) -> Self {
        Self { storage, feed }
    }

    /// Create a profile and its credentials. The password must already be
    /// hashed with [`hash_password`].
    pub fn register(
        &self,
        email: &str,
        password_hash: &str,
        username: &str,
        display_name: &str,
    ) -> CotaskResult<Profile> {
        let email = normalize_email(email)?;
        let username = username.trim();
        validate_username(username)?;
        let display_name = match display_name.trim() {
            "" => username.to_string(),
            name => name.to_string(),
        };

        let profile = Profile {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            display_name,
            avatar_url: None,
            created_at: now_secs(),
        };
        self.storage.insert_account(&profile, &email, password_hash)?;
        crate::clog!(
            "auth: registered {} as {}",
            logging::user_id(&profile.id),
            profile.username
        );
        self.feed
            .publish(ChangeKind::Insert, Record::Profile(profile.clone()));
        Ok(profile)
    }

    pub fn credentials_for(&self, email: &str) -> CotaskResult<Option<Credentials>> {
        let email = email.trim().to_lowercase();
        Ok(self.storage.get_credentials_by_email(&email)?)
    }

    pub fn current_user(&self, user_id: &str) -> CotaskResult<Option<CurrentUser>> {
        Ok(self.storage.get_email(user_id)?.map(|email| CurrentUser {
            id: user_id.to_string(),
            email,
        }))
    }

    pub fn profile(&self, user_id: &str) -> CotaskResult<Profile> {
        self.storage
            .get_profile(user_id)?
            .ok_or_else(|| CotaskError::not_found(format!("user {user_id}")))
    }

    pub fn update_display_name(&self, user_id: &str, display_name: &str) -> CotaskResult<Profile> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(CotaskError::validation("display name cannot be empty"));
        }
        let profile = self.profile(user_id)?;
        self.write_profile(user_id, display_name, profile.avatar_url.as_deref())
    }

    pub fn set_avatar(&self, user_id: &str, avatar_url: Option<&str>) -> CotaskResult<Profile> {
        let profile = self.profile(user_id)?;
        self.write_profile(user_id, &profile.display_name, avatar_url)
    }

    fn write_profile(
        &self,
        user_id: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> CotaskResult<Profile> {
        if !self
            .storage
            .update_profile(user_id, display_name, avatar_url)?
        {
            return Err(CotaskError::not_found(format!("user {user_id}")));
        }
        let profile = self.profile(user_id)?;
        self.feed
            .publish(ChangeKind::Update, Record::Profile(profile.clone()));
        Ok(profile)
    }

    /// Delete an account with everything it owns, publishing a delete for
    /// each row other sessions may be showing.
    pub fn delete_account(&self, user_id: &str) -> CotaskResult<()> {
        let profile = self.profile(user_id)?;
        let sharing = Sharing::new(self.storage, self.feed);
        let ledger = RelationshipLedger::new(self.storage, self.feed);

        for kind in [ResourceKind::List, ResourceKind::Note] {
            for resource in self.storage.list_owned(kind, user_id)? {
                sharing.delete_resource(kind, resource.id(), user_id)?;
            }
            for grant in self.storage.list_grants_for_grantee(kind, user_id)? {
                sharing.leave_shared_resource(kind, &grant.resource_id, user_id)?;
            }
        }
        let relationships: Vec<_> = ledger
            .list_for_user(user_id)
            .collect::<CotaskResult<Vec<_>>>()?;
        for contact in relationships {
            ledger.remove(&contact.relationship.id, user_id)?;
        }

        self.storage.delete_profile(user_id)?;
        crate::clog!("auth: deleted account {}", logging::user_id(user_id));
        self.feed.publish(ChangeKind::Delete, Record::Profile(profile));
        Ok(())
    }
}

/// In-memory bearer tokens. Sessions do not survive a restart.
///
/// Every revocation bumps a counter on a watch channel so that long-lived
/// connections can re-check their token.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<String, String>,
    revocations: watch::Sender<u64>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (revocations, _) = watch::channel(0);
        Self {
            sessions: HashMap::new(),
            revocations,
        }
    }

    /// Wakes whenever a session is revoked.
    pub fn revocations(&self) -> watch::Receiver<u64> {
        self.revocations.subscribe()
    }

    fn bump(&self) {
        self.revocations.send_modify(|n| *n += 1);
    }

    pub fn create(&mut self, user_id: &str) -> String {
        let mut bytes = [0u8; SESSION_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.sessions.insert(token.clone(), user_id.to_string());
        token
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.sessions.get(token).map(String::as_str)
    }

    pub fn revoke(&mut self, token: &str) -> bool {
        let removed = self.sessions.remove(token).is_some();
        if removed {
            self.bump();
        }
        removed
    }

    /// Drop every session of one user.
    pub fn revoke_user(&mut self, user_id: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, owner| owner != user_id);
        let removed = before - self.sessions.len();
        if removed > 0 {
            self.bump();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
