//! The fulfillment engine: a storage boundary with transactional guarantees
//! plus the service layer that drives cart, inventory and order operations
//! through it.
//!
//! The split mirrors the rest of the workspace: domain crates hold the pure
//! rules (allocation planning, pricing, the status table) while this crate
//! owns everything that has to happen atomically against shared state.

pub mod config;
pub mod engine;
pub mod error;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::EngineConfig;
pub use engine::{InventoryAdjustment, OrderEngine, OrderReceipt, StatusChange};
pub use error::EngineError;
pub use store::{FulfillmentStore, MemoryStore, OrderWithItems, StoreError};

#[cfg(feature = "postgres")]
pub use store::PostgresStore;
