//! Order pricing.
//!
//! The calculator is a pure function over priced line items: same lines in,
//! same breakdown out. All intermediate math stays in integer cents; each
//! output field is rounded at most once, inside `Money::apply_rate_bp`.

pub mod policy;

pub use policy::{LinePrice, PriceBreakdown, PricingPolicy};
