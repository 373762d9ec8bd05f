use std::sync::Mutex;

use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

const SESSION_KEY: &str = "session";

/// Process-wide login state: the bearer token plus the few profile fields
/// the UI shows without a round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub full_name: String,
    pub profile_image: Option<String>,
    pub email_address: String,
}

/// Key-value home of the [`Session`]. Set at login, cleared at logout.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;

    /// The token as of now. Callers ask for it on every request.
    fn token(&self) -> Result<String> {
        match self.load()? {
            Some(session) if !session.token.is_empty() => Ok(session.token),
            _ => Err(Error::AuthMissing),
        }
    }

    fn email_address(&self) -> Result<Option<String>> {
        Ok(self
            .load()?
            .map(|s| s.email_address)
            .filter(|e| !e.is_empty()))
    }
}

/// Keeps the session as JSON in the OS keyring.
pub struct RingStorage {
    service: String,
}

impl RingStorage {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, SESSION_KEY)
            .map_err(|e| Error::Session(format!("Keyring error: {}", e)))
    }
}

impl SessionStore for RingStorage {
    fn load(&self) -> Result<Option<Session>> {
        match self.entry()?.get_password() {
            Ok(serialized) => Ok(Some(serde_json::from_str(&serialized)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Session(format!("Keyring error: {}", e))),
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        let serialized = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&serialized)
            .map_err(|e| Error::Session(format!("Keyring error: {}", e)))?;
        debug!(user = %session.user_id, "session stored in keyring");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Session(format!("Keyring error: {}", e))),
        }
    }
}

/// Session kept in process memory only.
#[derive(Default)]
pub struct MemoryStore {
    session: Mutex<Option<Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<Session>> {
        let guard = self
            .session
            .lock()
            .map_err(|_| Error::Session("session lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| Error::Session("session lock poisoned".to_string()))?;
        *guard = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| Error::Session("session lock poisoned".to_string()))?;
        *guard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_requires_a_session() {
        let store = MemoryStore::new();
        assert!(matches!(store.token(), Err(Error::AuthMissing)));

        store
            .save(&Session {
                token: "t".to_string(),
                ..Session::default()
            })
            .unwrap();
        assert_eq!(store.token().unwrap(), "t");

        store.clear().unwrap();
        assert!(matches!(store.token(), Err(Error::AuthMissing)));
    }

    #[test]
    fn test_blank_token_counts_as_missing() {
        let store = MemoryStore::with_session(Session::default());
        assert!(matches!(store.token(), Err(Error::AuthMissing)));
        assert_eq!(store.email_address().unwrap(), None);
    }
}
