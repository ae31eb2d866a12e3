//! Shopping carts and checkout snapshots.
//!
//! A cart only remembers which products a user wants and in what quantity.
//! Prices are never stored on the cart; they are looked up from the catalog
//! at checkout when the cart is frozen into a [`CartSnapshot`].

pub mod cart;
pub mod snapshot;

pub use cart::{Cart, CartItem};
pub use snapshot::{CartSnapshot, SnapshotLine};
