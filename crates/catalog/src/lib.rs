//! `ordermill-catalog`: the product catalog boundary.
//!
//! The catalog is an external collaborator of the fulfillment engine: the
//! engine reads products to validate line items and freeze purchase prices,
//! and never writes to it through this crate.

pub mod product;

pub use product::{Catalog, Product};
