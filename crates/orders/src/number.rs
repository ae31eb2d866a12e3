use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ordermill_core::{DomainError, DomainResult};

/// Human-facing order number, `ORD-<8 digits>-<6 hex chars>`.
///
/// The digit block is the low end of the creation timestamp in milliseconds,
/// the suffix is random. Collisions are possible in principle, so storage
/// enforces uniqueness and callers regenerate on conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let digits = millis.rem_euclid(100_000_000);
        let hex = Uuid::new_v4().simple().to_string();
        let suffix = hex[..6].to_ascii_uppercase();
        Self(format!("ORD-{digits:08}-{suffix}"))
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        let well_formed = s.len() == 19
            && s.starts_with("ORD-")
            && s.as_bytes()[12] == b'-'
            && s[4..12].bytes().all(|b| b.is_ascii_digit())
            && s[13..].bytes().all(|b| b.is_ascii_alphanumeric());
        if well_formed {
            Ok(Self(s.to_string()))
        } else {
            Err(DomainError::validation(format!("malformed order number '{s}'")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_numbers_are_well_formed() {
        for _ in 0..100 {
            let number = OrderNumber::generate();
            OrderNumber::parse(number.as_str()).unwrap();
        }
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        for bad in [
            "",
            "ORD-1234-ABCDEF",
            "ord-12345678-ABCDEF",
            "ORD-1234567X-ABCDEF",
            "ORD-12345678-ABC DE",
            "ORD-12345678-ABCDEFG",
        ] {
            assert!(OrderNumber::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
