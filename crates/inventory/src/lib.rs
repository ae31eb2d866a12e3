//! `ordermill-inventory`: stock records and reservation planning.
//!
//! The quantity invariant (`quantity >= 0`, enforced by the mutation path,
//! never by post-hoc checks) lives here. The pure planning functions in
//! [`ledger`] decide *what* to decrement; store backends execute the plan
//! atomically.

pub mod ledger;
pub mod record;

pub use ledger::{allocate, available, ReservedLot, StockLine};
pub use record::{InventoryRecord, StockLevel};
