//! Orders: the state machine, addresses, order numbers and the order record
//! itself. Everything here is pure domain logic; persistence and
//! transactional behavior live in the engine crate.

pub mod address;
pub mod number;
pub mod order;
pub mod status;

pub use address::{Address, AddressInput, AddressKind};
pub use number::OrderNumber;
pub use order::{Order, OrderLineItem};
pub use status::OrderStatus;
