//! Domain layer of the product catalog.
//!
//! Holds the product and seller value types, the stock notification channels
//! and the versioned response shapes. Nothing in here touches storage or HTTP.
pub mod notifier;
pub mod presenter;
pub mod types;
