//! Aggregates module
pub mod cart;
pub mod coupon;
pub mod order;
pub mod product;
pub mod stock;

pub use cart::{Cart, CartError, CartLine, ProductSnapshot};
pub use coupon::{Coupon, CouponError, CouponStatus, DiscountKind, NewCoupon};
pub use order::{CustomerSnapshot, NewOrder, Order, OrderDetails, OrderError, OrderLine, OrderStatus, PaymentMethod, Pricing};
pub use product::{Additional, CatalogError, Category, Product, ProductDraft, Variation};
pub use stock::{StockLevel, StockStatus};
