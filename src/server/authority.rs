//! Component J: [`Authority`] — a pluggable gate that turns a new Session
//! into an identifier, or rejects it (spec.md §4.J).

use std::collections::HashMap;
use std::ops::RangeInclusive;

use async_trait::async_trait;

use crate::device::PeerCredentials;
use crate::peer_creds;
use crate::value::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Authorized,
    NotAuthorized,
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRecord {
    pub state: AuthState,
    pub identifier: Option<String>,
}

impl AuthRecord {
    pub fn authorized(identifier: impl Into<String>) -> Self {
        AuthRecord { state: AuthState::Authorized, identifier: Some(identifier.into()) }
    }

    pub fn not_authorized() -> Self {
        AuthRecord { state: AuthState::NotAuthorized, identifier: None }
    }

    pub fn in_progress() -> Self {
        AuthRecord { state: AuthState::InProgress, identifier: None }
    }
}

/// Converts a newly-accepted Session into an identifier, or rejects it.
/// Peer-UID and Peer-PID authorize at connect time; Token authorizes on the
/// first inbound object.
#[async_trait]
pub trait Authority: Send + Sync {
    async fn on_client_connected(&self, credentials: Option<PeerCredentials>) -> AuthRecord;
    async fn on_message_received(&self, message: &Message) -> AuthRecord;
}

/// No authority configured: every Session self-issues a fresh opaque
/// identifier and is immediately Authorized (spec.md §4.I).
pub struct NoneAuthority;

#[async_trait]
impl Authority for NoneAuthority {
    async fn on_client_connected(&self, _credentials: Option<PeerCredentials>) -> AuthRecord {
        AuthRecord::authorized(uuid::Uuid::new_v4().to_string())
    }

    async fn on_message_received(&self, _message: &Message) -> AuthRecord {
        AuthRecord::in_progress()
    }
}

enum UidRule {
    Exact(u32),
    Range(RangeInclusive<u32>),
}

/// Authorizes by the connecting peer's effective uid, either against an
/// exact allow-list or a `[min, max]` range. The identifier is always
/// resolved from the live `/etc/passwd` database, not a registration-time
/// label (spec.md §4.J).
pub struct PeerUidAuthority {
    rules: Vec<UidRule>,
}

impl PeerUidAuthority {
    pub fn new() -> Self {
        PeerUidAuthority { rules: Vec::new() }
    }

    /// Allow one uid.
    pub fn allow_uid(mut self, uid: u32) -> Self {
        self.rules.push(UidRule::Exact(uid));
        self
    }

    /// Allow an inclusive uid range.
    pub fn allow_uid_range(mut self, range: RangeInclusive<u32>) -> Self {
        self.rules.push(UidRule::Range(range));
        self
    }
}

impl Default for PeerUidAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authority for PeerUidAuthority {
    async fn on_client_connected(&self, credentials: Option<PeerCredentials>) -> AuthRecord {
        let Some(creds) = credentials else {
            return AuthRecord::not_authorized();
        };
        let matches = self.rules.iter().any(|rule| match rule {
            UidRule::Exact(uid) => *uid == creds.uid,
            UidRule::Range(range) => range.contains(&creds.uid),
        });
        if !matches {
            return AuthRecord::not_authorized();
        }
        let identifier = peer_creds::passwd_name(creds.uid).unwrap_or_else(|| creds.uid.to_string());
        AuthRecord::authorized(identifier)
    }

    async fn on_message_received(&self, _message: &Message) -> AuthRecord {
        // Decided entirely at connect time; no message-driven path.
        AuthRecord::not_authorized()
    }
}

/// Authorizes by the connecting peer's pid against a pre-registered map.
pub struct PeerPidAuthority {
    known: HashMap<u32, String>,
}

impl PeerPidAuthority {
    pub fn new() -> Self {
        PeerPidAuthority { known: HashMap::new() }
    }

    pub fn register(mut self, pid: u32, identifier: impl Into<String>) -> Self {
        self.known.insert(pid, identifier.into());
        self
    }
}

impl Default for PeerPidAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authority for PeerPidAuthority {
    async fn on_client_connected(&self, credentials: Option<PeerCredentials>) -> AuthRecord {
        match credentials.and_then(|c| self.known.get(&c.pid)) {
            Some(identifier) => AuthRecord::authorized(identifier.clone()),
            None => AuthRecord::not_authorized(),
        }
    }

    async fn on_message_received(&self, _message: &Message) -> AuthRecord {
        AuthRecord::not_authorized()
    }
}

/// Authorizes on the first inbound object whose `"token"` value matches a
/// pre-registered token→identifier map (spec.md §6 Authority protocol).
pub struct TokenAuthority {
    tokens: HashMap<String, String>,
}

impl TokenAuthority {
    pub fn new() -> Self {
        TokenAuthority { tokens: HashMap::new() }
    }

    pub fn register(mut self, token: impl Into<String>, identifier: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), identifier.into());
        self
    }
}

impl Default for TokenAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authority for TokenAuthority {
    async fn on_client_connected(&self, _credentials: Option<PeerCredentials>) -> AuthRecord {
        AuthRecord::in_progress()
    }

    async fn on_message_received(&self, message: &Message) -> AuthRecord {
        match message.get("token").and_then(|v| v.as_str()) {
            Some(token) => match self.tokens.get(token) {
                Some(identifier) => AuthRecord::authorized(identifier.clone()),
                None => AuthRecord::not_authorized(),
            },
            None => AuthRecord::not_authorized(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn creds(uid: u32, pid: u32) -> PeerCredentials {
        PeerCredentials { uid, pid }
    }

    #[tokio::test]
    async fn none_authority_self_issues_identifier() {
        let auth = NoneAuthority;
        let record = auth.on_client_connected(None).await;
        assert_eq!(record.state, AuthState::Authorized);
        assert!(record.identifier.is_some());
    }

    #[tokio::test]
    async fn peer_uid_exact_and_range_fall_back_to_decimal_uid() {
        // u32::MAX has no real passwd entry on any test host, so the
        // identifier always falls back to the decimal uid here.
        let auth = PeerUidAuthority::new().allow_uid(u32::MAX).allow_uid_range(2000..=2010);
        assert_eq!(
            auth.on_client_connected(Some(creds(u32::MAX, 1))).await,
            AuthRecord::authorized(u32::MAX.to_string())
        );
        assert_eq!(
            auth.on_client_connected(Some(creds(2005, 1))).await.identifier,
            Some(peer_creds::passwd_name(2005).unwrap_or_else(|| "2005".to_owned()))
        );
        assert_eq!(auth.on_client_connected(Some(creds(9999, 1))).await.state, AuthState::NotAuthorized);
    }

    #[tokio::test]
    async fn peer_pid_registered_map() {
        let auth = PeerPidAuthority::new().register(42, "worker-a");
        assert_eq!(auth.on_client_connected(Some(creds(0, 42))).await, AuthRecord::authorized("worker-a"));
        assert_eq!(auth.on_client_connected(Some(creds(0, 7))).await.state, AuthState::NotAuthorized);
    }

    #[tokio::test]
    async fn token_authorizes_on_first_message() {
        let auth = TokenAuthority::new().register("T1", "alice");
        assert_eq!(auth.on_client_connected(None).await.state, AuthState::InProgress);
        let msg = json!({"token": "T1"}).as_object().cloned().unwrap();
        assert_eq!(auth.on_message_received(&msg).await, AuthRecord::authorized("alice"));
        let bad = json!({"token": "bogus"}).as_object().cloned().unwrap();
        assert_eq!(auth.on_message_received(&bad).await.state, AuthState::NotAuthorized);
    }
}
