//! Server-side identity contexts, one per browser session.
//!
//! Each context gets the cart transfer listener attached when it is created,
//! so a sign-in request only has to record the sign-in and wait for the
//! listener to settle the cart owner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use super::cart::CartService;
use crate::domain::identity::{Identity, IdentityContext, SessionToken, UserId};

#[derive(Clone)]
pub struct SessionRegistry {
    carts: CartService,
    contexts: Arc<RwLock<HashMap<SessionToken, Arc<IdentityContext>>>>,
    settle_within: Duration,
}

impl SessionRegistry {
    pub fn new(carts: CartService, settle_within: Duration) -> Self {
        Self { carts, contexts: Arc::default(), settle_within }
    }

    /// The session's context, created with its transfer listener on first use.
    pub async fn context(&self, session: &SessionToken) -> Arc<IdentityContext> {
        if let Some(ctx) = self.contexts.read().await.get(session) {
            return ctx.clone();
        }
        let mut contexts = self.contexts.write().await;
        let ctx = contexts.entry(session.clone()).or_insert_with(|| Arc::new(IdentityContext::new(session.clone()))).clone();
        match self.carts.attach(&ctx) {
            Ok(_listener) => debug!(session = %session, "Identity context created"),
            Err(e) => debug!(session = %session, reason = %e, "Identity context reused"),
        }
        ctx
    }

    /// Signs `user` in on `session` and returns the cart owner once the
    /// transfer has run: the user, or the session when the transfer failed.
    pub async fn sign_in(&self, session: &SessionToken, user: UserId) -> Identity {
        let ctx = self.context(session).await;
        if ctx.current().await == Identity::Authenticated(user) {
            return ctx.cart_owner().await;
        }
        let mut owner = ctx.watch_cart_owner();
        ctx.sign_in(user).await;
        self.settle(&ctx, &mut owner).await
    }

    /// Signs the session out and forgets its context. The session owns the
    /// cart again afterwards.
    pub async fn sign_out(&self, session: &SessionToken) -> Identity {
        let removed = self.contexts.write().await.remove(session);
        if let Some(ctx) = removed {
            if ctx.user().await.is_some() {
                let mut owner = ctx.watch_cart_owner();
                ctx.sign_out().await;
                self.settle(&ctx, &mut owner).await;
            }
        }
        Identity::Anonymous(session.clone())
    }

    pub async fn len(&self) -> usize { self.contexts.read().await.len() }

    async fn settle(&self, ctx: &IdentityContext, owner: &mut watch::Receiver<Identity>) -> Identity {
        if tokio::time::timeout(self.settle_within, owner.changed()).await.is_err() {
            warn!(session = %ctx.session(), "Cart owner did not settle in time");
        }
        ctx.cart_owner().await
    }
}
