//! Domain layer
pub mod aggregates;
pub mod checkout;
pub mod identity;
pub mod reports;
pub mod value_objects;
