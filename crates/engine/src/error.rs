use thiserror::Error;

use ordermill_core::{DomainError, ProductId};

use crate::store::StoreError;

/// Error surface of [`crate::OrderEngine`].
///
/// Domain rejections and storage failures both land here so callers handle
/// one enum; every variant keeps the identifiers and quantities needed for
/// a precise message.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    #[error("invalid transition: cannot move from '{current}' to '{attempted}'")]
    InvalidTransition { current: String, attempted: String },

    #[error("not found")]
    NotFound,

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => EngineError::Validation(msg),
            DomainError::InvalidId(msg) => EngineError::Validation(msg),
            DomainError::InsufficientStock {
                product_id,
                requested,
                available,
            } => EngineError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            DomainError::InvalidTransition { current, attempted } => {
                EngineError::InvalidTransition { current, attempted }
            }
            DomainError::NotFound => EngineError::NotFound,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Domain(domain) => domain.into(),
            StoreError::EmptyCart => EngineError::Validation("cart is empty".to_string()),
            StoreError::DuplicateOrderNumber(number) => {
                EngineError::Persistence(format!("order number '{number}' already exists"))
            }
            StoreError::Persistence { operation, message } => {
                EngineError::Persistence(format!("{operation}: {message}"))
            }
        }
    }
}
