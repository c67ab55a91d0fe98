use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rill_core::{
    AccountLogin, AccountRepository, NewAccount, PendingAccount, RepositoryError, Session,
    SessionRepository, SessionToken, UserId,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct AccountRecord {
    username: String,
    email: String,
    password_hash: String,
    active: bool,
    avatar_url: Option<String>,
}

/// Accounts are kept behind one lock so the uniqueness check and the insert
/// happen atomically.
#[derive(Debug, Default)]
struct Accounts {
    by_id: HashMap<UserId, AccountRecord>,
    confirm_tokens: HashMap<Uuid, UserId>,
}

/// Repository held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    sessions: DashMap<SessionToken, Session>,
    accounts: RwLock<Accounts>,
    unavailable: AtomicBool,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `RepositoryError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Seeds a session directly, bypassing account confirmation.
    pub fn insert_session(&self, session: Session) {
        self.sessions.insert(session.token, session);
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_active(&self, user_id: UserId) -> bool {
        self.accounts
            .read()
            .by_id
            .get(&user_id)
            .is_some_and(|a| a.active)
    }

    #[must_use]
    pub fn avatar_url(&self, user_id: UserId) -> Option<String> {
        self.accounts
            .read()
            .by_id
            .get(&user_id)
            .and_then(|a| a.avatar_url.clone())
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("memory repository switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn lookup_session(
        &self,
        token: &SessionToken,
    ) -> Result<Option<Session>, RepositoryError> {
        self.check_available()?;
        // An expired entry is evicted but still returned once so the caller
        // can tell expiry apart from an unknown token.
        let now = Utc::now();
        if let Some((_, expired)) = self.sessions.remove_if(token, |_, s| !s.is_valid_at(now)) {
            return Ok(Some(expired));
        }
        Ok(self.sessions.get(token).map(|entry| entry.value().clone()))
    }

    async fn create_session(
        &self,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, RepositoryError> {
        self.check_available()?;
        let now = Utc::now();
        self.sessions.retain(|_, s| s.is_valid_at(now));
        let session = Session {
            token: SessionToken::generate(),
            user_id,
            expires_at,
        };
        self.sessions.insert(session.token, session.clone());
        Ok(session)
    }

    async fn delete_session(&self, token: &SessionToken) -> Result<bool, RepositoryError> {
        self.check_available()?;
        Ok(self.sessions.remove(token).is_some())
    }
}

#[async_trait]
impl AccountRepository for MemoryRepository {
    async fn create_account(&self, account: NewAccount) -> Result<PendingAccount, RepositoryError> {
        self.check_available()?;
        let mut accounts = self.accounts.write();

        for existing in accounts.by_id.values() {
            if existing.username == account.username {
                return Err(RepositoryError::Conflict("username already taken".to_string()));
            }
            if existing.email.eq_ignore_ascii_case(&account.email) {
                return Err(RepositoryError::Conflict("email already registered".to_string()));
            }
        }

        let pending = PendingAccount {
            user_id: UserId::new(),
            confirm_token: Uuid::new_v4(),
        };
        accounts.by_id.insert(
            pending.user_id,
            AccountRecord {
                username: account.username,
                email: account.email,
                password_hash: account.password_hash,
                active: false,
                avatar_url: None,
            },
        );
        accounts
            .confirm_tokens
            .insert(pending.confirm_token, pending.user_id);
        Ok(pending)
    }

    async fn confirm_account(&self, confirm_token: Uuid) -> Result<Option<UserId>, RepositoryError> {
        self.check_available()?;
        let mut accounts = self.accounts.write();
        let Some(user_id) = accounts.confirm_tokens.remove(&confirm_token) else {
            return Ok(None);
        };
        if let Some(record) = accounts.by_id.get_mut(&user_id) {
            record.active = true;
        }
        Ok(Some(user_id))
    }

    async fn find_login(&self, username: &str) -> Result<Option<AccountLogin>, RepositoryError> {
        self.check_available()?;
        let accounts = self.accounts.read();
        Ok(accounts
            .by_id
            .iter()
            .find(|(_, record)| record.username == username)
            .map(|(user_id, record)| AccountLogin {
                user_id: *user_id,
                password_hash: record.password_hash.clone(),
                active: record.active,
            }))
    }

    async fn set_avatar_url(&self, user_id: UserId, url: &str) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut accounts = self.accounts.write();
        let record = accounts
            .by_id
            .get_mut(&user_id)
            .ok_or(RepositoryError::NotFound)?;
        record.avatar_url = Some(url.to_string());
        Ok(())
    }
}
