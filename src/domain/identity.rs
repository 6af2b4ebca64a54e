//! Who is acting: an anonymous browser session or a signed-in user.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque token generated once per browser and kept in its local storage.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        Self(format!("session_{}_{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple()))
    }

    pub fn parse(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(IdentityError::EmptySession); }
        if value.len() > 128 { return Err(IdentityError::SessionTooLong); }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for SessionToken {
    type Error = IdentityError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(value) }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self { token.0 }
}

/// Identifier issued by the authentication provider at sign-in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn new(id: Uuid) -> Self { Self(id) }
    pub fn as_uuid(&self) -> Uuid { self.0 }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl FromStr for UserId {
    type Err = IdentityError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self).map_err(|_| IdentityError::InvalidUser(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("session token is empty")]
    EmptySession,
    #[error("session token is longer than 128 characters")]
    SessionTooLong,
    #[error("invalid user id: {0}")]
    InvalidUser(String),
}

/// The key that owns a cart.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Identity {
    Anonymous(SessionToken),
    Authenticated(UserId),
}

impl Identity {
    pub fn user(&self) -> Option<UserId> {
        match self {
            Self::Authenticated(user) => Some(*user),
            Self::Anonymous(_) => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous(session) => write!(f, "session:{session}"),
            Self::Authenticated(user) => write!(f, "user:{user}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityEvent {
    SignedIn { session: SessionToken, user: UserId },
    SignedOut { user: UserId },
}

/// Per-tab identity state, passed explicitly to whatever needs it.
///
/// Sign-in and sign-out are broadcast as [`IdentityEvent`]s. The cart owner
/// is tracked separately from the signed-in user: it only moves to the user
/// once the session cart has been transferred.
pub struct IdentityContext {
    session: SessionToken,
    user: RwLock<Option<UserId>>,
    cart_owner: watch::Sender<Identity>,
    events: broadcast::Sender<IdentityEvent>,
    listener_attached: AtomicBool,
}

impl IdentityContext {
    pub fn new(session: SessionToken) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            cart_owner: watch::Sender::new(Identity::Anonymous(session.clone())),
            session,
            user: RwLock::new(None),
            events,
            listener_attached: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &SessionToken { &self.session }

    pub async fn user(&self) -> Option<UserId> { *self.user.read().await }

    /// The signed-in user if any, otherwise the session.
    pub async fn current(&self) -> Identity {
        match *self.user.read().await {
            Some(user) => Identity::Authenticated(user),
            None => Identity::Anonymous(self.session.clone()),
        }
    }

    pub async fn cart_owner(&self) -> Identity { self.cart_owner.borrow().clone() }

    /// Notified every time the sign-in listener settles the cart owner, even
    /// when the owner stays the same (a failed transfer).
    pub fn watch_cart_owner(&self) -> watch::Receiver<Identity> { self.cart_owner.subscribe() }

    pub(crate) async fn set_cart_owner(&self, owner: Identity) {
        self.cart_owner.send_replace(owner);
    }

    /// Records a completed sign-in reported by the authentication provider.
    pub async fn sign_in(&self, user: UserId) {
        {
            let mut current = self.user.write().await;
            if *current == Some(user) { return; }
            *current = Some(user);
        }
        info!(user = %user, session = %self.session, "Signed in");
        self.emit(IdentityEvent::SignedIn { session: self.session.clone(), user });
    }

    pub async fn sign_out(&self) {
        let Some(user) = self.user.write().await.take() else { return };
        info!(user = %user, "Signed out");
        self.emit(IdentityEvent::SignedOut { user });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> { self.events.subscribe() }

    /// Returns `true` only for the first caller.
    pub(crate) fn claim_listener(&self) -> bool { !self.listener_attached.swap(true, Ordering::SeqCst) }

    fn emit(&self, event: IdentityEvent) {
        if self.events.send(event).is_err() {
            debug!("No identity listeners");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token() {
        let token = SessionToken::generate();
        assert!(token.as_str().starts_with("session_"));
        assert_eq!(SessionToken::parse("  "), Err(IdentityError::EmptySession));
        assert!(SessionToken::parse("x".repeat(129)).is_err());
    }

    #[test]
    fn test_identity_serde() {
        let user = UserId::new(Uuid::nil());
        let json = serde_json::to_value(Identity::Authenticated(user)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "authenticated", "id": Uuid::nil()}));
    }

    #[tokio::test]
    async fn test_sign_in_and_out_emit_events() {
        let ctx = IdentityContext::new(SessionToken::parse("session_a").unwrap());
        let mut events = ctx.subscribe();
        let user = UserId::new(Uuid::new_v4());

        ctx.sign_in(user).await;
        ctx.sign_in(user).await;
        assert_eq!(ctx.current().await, Identity::Authenticated(user));
        assert_eq!(ctx.cart_owner().await, Identity::Anonymous(ctx.session().clone()));

        ctx.sign_out().await;
        assert_eq!(events.recv().await.unwrap(), IdentityEvent::SignedIn { session: ctx.session().clone(), user });
        assert_eq!(events.recv().await.unwrap(), IdentityEvent::SignedOut { user });
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cart_owner_changes_are_observable() {
        let ctx = IdentityContext::new(SessionToken::parse("session_a").unwrap());
        let mut owner = ctx.watch_cart_owner();
        let user = UserId::new(Uuid::new_v4());

        ctx.set_cart_owner(Identity::Authenticated(user)).await;
        owner.changed().await.unwrap();
        assert_eq!(*owner.borrow_and_update(), Identity::Authenticated(user));

        ctx.set_cart_owner(Identity::Authenticated(user)).await;
        assert!(owner.has_changed().unwrap());
    }

    #[test]
    fn test_listener_claimed_once() {
        let ctx = IdentityContext::new(SessionToken::generate());
        assert!(ctx.claim_listener());
        assert!(!ctx.claim_listener());
    }
}
