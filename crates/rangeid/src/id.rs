use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Longest identifier accepted for apps and pools.
pub const MAX_IDENTIFIER_LEN: usize = 128;

fn validate(value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.len() > MAX_IDENTIFIER_LEN {
        "exceeds 128 characters"
    } else if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-'))
    {
        "may only contain [A-Za-z0-9._:-]"
    } else {
        return Ok(());
    };

    Err(Error::InvalidIdentifier {
        value: value.to_owned(),
        reason,
    })
}

/// Defines a validated string identifier.
///
/// Each generated type:
/// - Rejects empty, overlong, or non `[A-Za-z0-9._:-]` values on construction
/// - Serializes as a bare string and validates again on deserialization
/// - Implements `Display`, `FromStr`, and `AsRef<str>`
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a validated identifier.
            ///
            /// # Errors
            ///
            /// Returns [`Error::InvalidIdentifier`] if the value is empty,
            /// longer than [`MAX_IDENTIFIER_LEN`], or contains characters
            /// outside `[A-Za-z0-9._:-]`.
            pub fn new(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                validate(&value)?;
                Ok(Self(value))
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

define_id!(
    /// Stable identifier of a client application.
    AppId
);

define_id!(
    /// Identifier of a pool of apps sharing one consumption record.
    PoolId
);

impl PoolId {
    /// Generates a fresh random pool identifier (128 bits, lowercase hex).
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_identifiers() {
        for raw in ["my-app", "a1b2c3d4-0000-4000-8000-000000000000", "ns:app.v2_x"] {
            assert_eq!(AppId::new(raw).unwrap().as_str(), raw);
        }
    }

    #[test]
    fn rejects_malformed_identifiers() {
        let too_long = "x".repeat(MAX_IDENTIFIER_LEN + 1);
        for raw in ["", "has/slash", "white space", too_long.as_str()] {
            let err = AppId::new(raw).unwrap_err();
            assert_eq!(err.kind(), "InvalidIdentifier", "{raw:?}");
        }
    }

    #[test]
    fn deserialization_validates() {
        let ok: PoolId = serde_json::from_str("\"pool-1\"").unwrap();
        assert_eq!(ok.to_string(), "pool-1");
        assert!(serde_json::from_str::<PoolId>("\"bad/id\"").is_err());
    }

    #[test]
    fn generated_pool_ids_are_distinct_hex() {
        let a = PoolId::generate();
        let b = PoolId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().bytes().all(|c| c.is_ascii_hexdigit()));
    }
}
