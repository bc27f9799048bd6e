//! Credential resolution for configured servers
//!
//! Servers only store an authentication reference (`authid`). The actual
//! username/password pair is looked up at construction time and never written
//! back to the settings store.

use std::collections::HashMap;
use std::fmt;

/// Username/password pair used for basic authentication
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Lookup of credentials by authentication reference
pub trait CredentialStore: Send + Sync {
    fn resolve(&self, authid: &str) -> Option<Credentials>;
}

/// Credentials taken from `GEOBRIDGE_AUTH_<ID>_USERNAME` / `_PASSWORD`
///
/// `<ID>` is the authid upper-cased with every non-alphanumeric character
/// replaced by `_`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    fn env_prefix(authid: &str) -> String {
        let id: String = authid
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("GEOBRIDGE_AUTH_{id}")
    }
}

impl CredentialStore for EnvCredentialStore {
    fn resolve(&self, authid: &str) -> Option<Credentials> {
        if authid.is_empty() {
            return None;
        }
        let prefix = Self::env_prefix(authid);
        let username = std::env::var(format!("{prefix}_USERNAME")).ok()?;
        let password = std::env::var(format!("{prefix}_PASSWORD")).unwrap_or_default();
        Some(Credentials { username, password })
    }
}

/// Fixed credential table
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialStore {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, authid: impl Into<String>, credentials: Credentials) -> Self {
        self.entries.insert(authid.into(), credentials);
        self
    }
}

impl CredentialStore for StaticCredentialStore {
    fn resolve(&self, authid: &str) -> Option<Credentials> {
        self.entries.get(authid).cloned()
    }
}
