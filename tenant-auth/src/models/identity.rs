//! Validated tenant and user identifiers.
//!
//! Every revocation key and every permission lookup embeds these values, so
//! they are checked once at the boundary and carried as newtypes afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const MAX_IDENTIFIER_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{0} must be at most {MAX_IDENTIFIER_LEN} characters")]
    TooLong(&'static str),

    #[error("{0} contains invalid character {1:?}")]
    InvalidCharacter(&'static str, char),
}

fn check(field: &'static str, raw: &str) -> Result<(), IdentifierError> {
    if raw.trim().is_empty() {
        return Err(IdentifierError::Missing(field));
    }
    if raw.len() > MAX_IDENTIFIER_LEN {
        return Err(IdentifierError::TooLong(field));
    }
    // ':' separates key segments in the revocation store
    if let Some(c) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@')))
    {
        return Err(IdentifierError::InvalidCharacter(field, c));
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: impl Into<String>) -> Result<Self, IdentifierError> {
                let raw = raw.into();
                check($field, &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentifierError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::parse(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

identifier!(
    /// Isolation boundary. Part of every key and every query.
    TenantId,
    "tenant_id"
);

identifier!(
    /// Subject of a credential; unique within its tenant.
    UserId,
    "user_id"
);
