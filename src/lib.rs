//! Storefront - food-ordering storefront and admin console backend
//!
//! Menu browsing, cart and checkout for customers; orders, products,
//! inventory, promotions and reports for the admin console.
//!
//! ## Features
//! - Carts owned by an anonymous browser session or a signed-in user
//! - Session-to-user cart transfer on sign-in
//! - Checkout that turns a cart into an order with price snapshots
//! - Percentage and fixed-amount coupons
//! - Forward-only order status tracking with a realtime order board
//! - Inventory levels, low-stock alerts and sales reports
//!
//! Persistence sits behind the traits in [`store`]; realtime change
//! notifications sit behind [`realtime::ChangeFeed`] and
//! [`realtime::ChangeSink`].

pub mod config;
pub mod domain;
pub mod http;
pub mod realtime;
pub mod services;
pub mod store;

pub use config::Config;
pub use domain::identity::{Identity, IdentityContext, IdentityEvent, SessionToken, UserId};
pub use domain::value_objects::{CouponCode, Customization, Money, Quantity};
pub use store::StoreError;
