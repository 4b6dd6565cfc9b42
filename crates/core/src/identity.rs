//! Caller identity normalization.
//!
//! Every cache namespace and the record store join on the same key: the
//! caller's phone number reduced to its digits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Normalized caller identity (digits-only phone number).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Normalize a raw phone number.
    ///
    /// Strips everything that is not an ASCII digit, so `+1 (555) 123-4567`
    /// and `15551234567` map to the same key. Normalizing an already
    /// normalized key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when the input contains no digits.
    pub fn normalize(raw: &str) -> Result<Self, Error> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(Error::InvalidInput(format!("phone number has no digits: {raw:?}")));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdentityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_formatting() {
        let key = IdentityKey::normalize("+1 (555) 123-4567").unwrap();
        assert_eq!(key.as_str(), "15551234567");
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = IdentityKey::normalize("+1-555-123-4567").unwrap();
        let twice = IdentityKey::normalize(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert!(matches!(IdentityKey::normalize(""), Err(Error::InvalidInput(_))));
        assert!(matches!(IdentityKey::normalize("+ - "), Err(Error::InvalidInput(_))));
    }
}
