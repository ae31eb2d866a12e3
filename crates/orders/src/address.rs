use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ordermill_core::{AddressId, DomainError, DomainResult, UserId};

/// What an address is for. Orders may carry one of each.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Shipping,
    Billing,
}

/// Caller-supplied address fields, validated into an [`Address`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressInput {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    /// Defaults to `"USA"` when omitted.
    pub country: Option<String>,
}

/// A validated postal address, snapshotted per order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub kind: AddressKind,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Address {
    pub fn new(user_id: UserId, kind: AddressKind, input: AddressInput) -> DomainResult<Self> {
        for (field, value) in [
            ("street", &input.street),
            ("city", &input.city),
            ("state", &input.state),
            ("zip_code", &input.zip_code),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::validation(format!("{field} cannot be empty")));
            }
        }
        let country = match input.country {
            Some(country) if !country.trim().is_empty() => country,
            _ => "USA".to_string(),
        };
        Ok(Self {
            id: AddressId::new(),
            user_id,
            kind,
            street: input.street,
            city: input.city,
            state: input.state,
            zip_code: input.zip_code,
            country,
            is_default: false,
            created_at: Utc::now(),
        })
    }
}
