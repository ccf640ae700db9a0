use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::{
    errors::SessionError,
    models::{auth::Token, session::Session, user::UserProfile},
    services::storage::{MemoryStorage, SessionStorage, StoredSession},
};

/// Sole owner of the persisted credentials. Reads come from an in-memory copy;
/// every mutation writes the full record through to storage before it becomes
/// visible.
pub struct SessionStore {
    storage: Box<dyn SessionStorage>,
    state: Mutex<Session>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Open a store over `storage`, classifying whatever tokens it already holds.
    pub fn open(storage: impl SessionStorage + 'static) -> Result<Self, SessionError> {
        let stored = storage.load()?;
        let session = session_from_stored(stored);
        debug!(
            has_access_token = session.access_token.is_some(),
            has_refresh_token = session.refresh_token.is_some(),
            "Session loaded from storage"
        );

        Ok(Self {
            storage: Box::new(storage),
            state: Mutex::new(session),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            storage: Box::new(MemoryStorage::new()),
            state: Mutex::new(Session::default()),
        }
    }

    /// Store a freshly issued session. `expires_at` is derived from `expires_in`
    /// (seconds) at call time. A `None` refresh token keeps the one already held.
    pub fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: i64,
        user: UserProfile,
    ) -> Result<(), SessionError> {
        self.set_session_at(access_token, refresh_token, expires_in, user, Utc::now())
    }

    pub fn set_session_at(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: i64,
        user: UserProfile,
        issued_at: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.mutate(|session| {
            session.access_token = Some(Token::classify(access_token));
            if let Some(refresh_token) = refresh_token {
                session.refresh_token = Some(Token::classify(refresh_token));
            }
            session.expires_at = Some(issued_at + Duration::seconds(expires_in));
            session.user = Some(user);
        })
    }

    /// Swap in a refreshed access token. The refresh token and profile stay.
    pub fn update_access_token(&self, access_token: &str, expires_in: i64) -> Result<(), SessionError> {
        let issued_at = Utc::now();
        self.mutate(|session| {
            session.access_token = Some(Token::classify(access_token));
            session.expires_at = Some(issued_at + Duration::seconds(expires_in));
        })
    }

    pub fn set_user(&self, user: UserProfile) -> Result<(), SessionError> {
        self.mutate(|session| session.user = Some(user))
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.as_ref().map(|t| t.as_str().to_string())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock().refresh_token.as_ref().map(|t| t.as_str().to_string())
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.lock().user.clone()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock().expires_at
    }

    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    /// An access token exists and is either still valid or backed by a refresh
    /// token that is. The actual refresh is deferred to request time.
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(Utc::now())
    }

    pub fn is_authenticated_at(&self, now: DateTime<Utc>) -> bool {
        let session = self.lock();
        let Some(access) = &session.access_token else {
            return false;
        };
        if !is_expired(access, session.expires_at, now) {
            return true;
        }
        session
            .refresh_token
            .as_ref()
            .is_some_and(|refresh| !is_expired(refresh, None, now))
    }

    pub fn is_access_token_expired_at(&self, now: DateTime<Utc>) -> bool {
        let session = self.lock();
        match &session.access_token {
            Some(access) => is_expired(access, session.expires_at, now),
            None => true,
        }
    }

    /// Drop every field. Memory is cleared even if the storage wipe fails.
    pub fn clear(&self) -> Result<(), SessionError> {
        let mut session = self.lock();
        *session = Session::default();
        self.storage.wipe()
    }

    fn mutate(&self, apply: impl FnOnce(&mut Session)) -> Result<(), SessionError> {
        let mut session = self.lock();
        let mut next = session.clone();
        apply(&mut next);
        self.storage.save(&stored_from_session(&next)?)?;
        *session = next;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Embedded `exp` wins over the local record; with neither the token is
/// treated as live.
fn is_expired(token: &Token, recorded: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match token.embedded_expiry().or(recorded) {
        Some(expires_at) => expires_at <= now,
        None => false,
    }
}

fn session_from_stored(stored: StoredSession) -> Session {
    let user = stored.user.and_then(|raw| match serde_json::from_str(&raw) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!("Dropping unreadable stored user profile: {e}");
            None
        }
    });

    let expires_at = stored.token_expires_at.and_then(|raw| {
        let parsed = raw
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis);
        if parsed.is_none() {
            warn!("Dropping unreadable stored token expiry: {raw:?}");
        }
        parsed
    });

    Session {
        access_token: stored.access_token.map(Token::classify),
        refresh_token: stored.refresh_token.map(Token::classify),
        expires_at,
        user,
    }
}

fn stored_from_session(session: &Session) -> Result<StoredSession, SessionError> {
    Ok(StoredSession {
        access_token: session.access_token.as_ref().map(|t| t.as_str().to_string()),
        refresh_token: session.refresh_token.as_ref().map(|t| t.as_str().to_string()),
        user: session.user.as_ref().map(serde_json::to_string).transpose()?,
        token_expires_at: session.expires_at.map(|at| at.timestamp_millis().to_string()),
    })
}
