//! Cart persistence, session-to-user transfer and optimistic mutation.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::aggregates::{Cart, CartError};
use crate::domain::identity::{Identity, IdentityContext, IdentityEvent, SessionToken, UserId};
use crate::store::{bounded, CartStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("cart transfer is already attached to this identity context")]
    AlreadyAttached,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error(transparent)]
    Rejected(#[from] CartError),
    #[error("cart could not be loaded: {0}")]
    Load(StoreError),
    /// The write failed. `reconciled` is what the store holds now, when it
    /// could be read back.
    #[error("cart change was not saved: {error}")]
    NotSaved { error: StoreError, reconciled: Option<Cart> },
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CartStore>,
    timeout: Duration,
}

impl CartService {
    pub fn new(store: Arc<dyn CartStore>, timeout: Duration) -> Self { Self { store, timeout } }

    /// Loads and merges duplicate (product, customization) lines, which a
    /// transfer can leave behind.
    ///
    /// An error means "unknown, retry later", never "empty".
    pub async fn load(&self, identity: &Identity) -> Result<Cart, StoreError> {
        let lines = bounded("cart.load", self.timeout, self.store.load(identity))
            .await
            .map_err(|e| log_failure(e, identity))?;
        Ok(Cart::from_lines(lines))
    }

    pub async fn save(&self, identity: &Identity, cart: &Cart) -> Result<(), StoreError> {
        bounded("cart.replace_all", self.timeout, self.store.replace_all(identity, cart.lines()))
            .await
            .map_err(|e| log_failure(e, identity))
    }

    pub async fn clear(&self, identity: &Identity) -> Result<(), StoreError> {
        bounded("cart.clear", self.timeout, self.store.clear(identity))
            .await
            .map_err(|e| log_failure(e, identity))
    }

    /// Re-owns the session's lines to `user` without summing duplicates.
    pub async fn transfer(&self, session: &SessionToken, user: UserId) -> Result<u64, StoreError> {
        let moved = bounded("cart.transfer", self.timeout, self.store.transfer(session, user))
            .await
            .map_err(|e| log_failure(e, &Identity::Anonymous(session.clone())))?;
        info!(session = %session, user = %user, moved, "Transferred session cart");
        Ok(moved)
    }

    /// Runs the transfer for a fresh sign-in and returns the identity that
    /// owns the cart afterwards. When the transfer fails the session keeps
    /// its cart so nothing disappears.
    pub async fn complete_sign_in(&self, session: &SessionToken, user: UserId) -> Identity {
        match self.transfer(session, user).await {
            Ok(_) => Identity::Authenticated(user),
            Err(e) => {
                warn!(session = %session, user = %user, error = %e, "Keeping session cart after failed transfer");
                Identity::Anonymous(session.clone())
            }
        }
    }

    /// Subscribes the transfer to `ctx` sign-in events. Only one listener
    /// may be attached per context.
    pub fn attach(&self, ctx: &Arc<IdentityContext>) -> Result<JoinHandle<()>, AttachError> {
        if !ctx.claim_listener() {
            return Err(AttachError::AlreadyAttached);
        }
        let mut events = ctx.subscribe();
        let ctx = Arc::downgrade(ctx);
        let service = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Identity listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(ctx) = ctx.upgrade() else { break };
                match event {
                    IdentityEvent::SignedIn { session, user } => {
                        let owner = service.complete_sign_in(&session, user).await;
                        ctx.set_cart_owner(owner).await;
                    }
                    IdentityEvent::SignedOut { .. } => {
                        ctx.set_cart_owner(Identity::Anonymous(ctx.session().clone())).await;
                    }
                }
            }
            debug!("Identity listener stopped");
        }))
    }

    /// Load, change in memory, replace. A failed write reloads from the store
    /// so the caller never keeps a cart the store does not have.
    pub async fn mutate<F>(&self, identity: &Identity, change: F) -> Result<Cart, MutationError>
    where
        F: FnOnce(&mut Cart) -> Result<(), CartError>,
    {
        let mut cart = self.load(identity).await.map_err(MutationError::Load)?;
        change(&mut cart)?;
        match self.save(identity, &cart).await {
            Ok(()) => Ok(cart),
            Err(error) => {
                let reconciled = self.load(identity).await.ok();
                Err(MutationError::NotSaved { error, reconciled })
            }
        }
    }
}

fn log_failure(error: StoreError, identity: &Identity) -> StoreError {
    warn!(operation = error.operation(), identity = %identity, error = %error, "Cart store call failed");
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{CartLine, ProductSnapshot};
    use crate::domain::value_objects::{Customization, Money, Quantity};
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn burger(qty: u32) -> CartLine {
        CartLine {
            product_id: Uuid::from_u128(1),
            snapshot: ProductSnapshot { name: "Burger".into(), unit_price: Money::from_cents(2590), image_url: None },
            quantity: Quantity::new(qty).unwrap(),
            customization: Customization::new(None, vec!["no-cheese".to_string()]),
        }
    }

    fn service(store: &Arc<MemoryStore>) -> CartService { CartService::new(store.clone(), Duration::from_millis(200)) }

    #[tokio::test]
    async fn test_transfer_then_load_sums_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let session = SessionToken::parse("session_a").unwrap();
        let user = UserId::new(Uuid::from_u128(9));

        carts.save(&Identity::Anonymous(session.clone()), &Cart::from_lines([burger(2)])).await.unwrap();
        carts.save(&Identity::Authenticated(user), &Cart::from_lines([burger(1)])).await.unwrap();

        assert_eq!(carts.transfer(&session, user).await.unwrap(), 1);
        assert_eq!(store.cart_rows().await.len(), 2);

        let cart = carts.load(&Identity::Authenticated(user)).await.unwrap();
        assert_eq!(cart.line_count(), 1);
        assert_eq!(cart.item_count(), 3);
        assert!(carts.load(&Identity::Anonymous(session)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_transfer_keeps_session_cart() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let session = SessionToken::parse("session_b").unwrap();
        let user = UserId::new(Uuid::from_u128(10));
        carts.save(&Identity::Anonymous(session.clone()), &Cart::from_lines([burger(2)])).await.unwrap();

        store.fail_on("cart.transfer").await;
        let owner = carts.complete_sign_in(&session, user).await;
        assert_eq!(owner, Identity::Anonymous(session.clone()));
        assert_eq!(carts.load(&owner).await.unwrap().item_count(), 2);
    }

    #[tokio::test]
    async fn test_attach_once_and_follow_sign_in() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let session = SessionToken::parse("session_c").unwrap();
        let user = UserId::new(Uuid::from_u128(11));
        carts.save(&Identity::Anonymous(session.clone()), &Cart::from_lines([burger(1)])).await.unwrap();

        let ctx = Arc::new(IdentityContext::new(session.clone()));
        let _listener = carts.attach(&ctx).unwrap();
        assert_eq!(carts.attach(&ctx).unwrap_err(), AttachError::AlreadyAttached);

        ctx.sign_in(user).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while ctx.cart_owner().await != Identity::Authenticated(user) { tokio::task::yield_now().await; }
        }).await.unwrap();
        assert_eq!(carts.load(&ctx.cart_owner().await).await.unwrap().item_count(), 1);

        ctx.sign_out().await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while ctx.cart_owner().await != Identity::Anonymous(session.clone()) { tokio::task::yield_now().await; }
        }).await.unwrap();
    }

    #[tokio::test]
    async fn test_mutate_reconciles_after_failed_write() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let owner = Identity::Anonymous(SessionToken::parse("session_d").unwrap());
        carts.mutate(&owner, |cart| { cart.add(burger(1)); Ok(()) }).await.unwrap();

        store.fail_on("cart.replace_all").await;
        let err = carts.mutate(&owner, |cart| { cart.add(burger(4)); Ok(()) }).await.unwrap_err();
        match err {
            MutationError::NotSaved { reconciled: Some(cart), .. } => assert_eq!(cart.item_count(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mutate_rejects_missing_line() {
        let store = Arc::new(MemoryStore::new());
        let carts = service(&store);
        let owner = Identity::Anonymous(SessionToken::parse("session_e").unwrap());
        let plain = Customization::default();
        let err = carts.mutate(&owner, |cart| cart.remove_one(Uuid::from_u128(1), &plain)).await.unwrap_err();
        assert_eq!(err, MutationError::Rejected(CartError::LineNotFound));
    }

    #[tokio::test]
    async fn test_stalled_load_times_out() {
        let store = Arc::new(MemoryStore::new());
        let carts = CartService::new(store.clone(), Duration::from_millis(20));
        store.stall_on("cart.load").await;
        let err = carts.load(&Identity::Anonymous(SessionToken::generate())).await.unwrap_err();
        assert!(matches!(err, StoreError::TimedOut { operation: "cart.load", .. }));
    }
}
