//! Opaque prefixed identifiers for depots, tickets and tokens.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Prefix carried by every id of this kind.
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random id.
            pub fn new() -> Self {
                Self(format!("{}{}", Self::PREFIX, Uuid::new_v4().simple()))
            }

            /// Parse from a string, checking the prefix and suffix shape.
            pub fn parse(s: &str) -> crate::Result<Self> {
                let suffix = s.strip_prefix(Self::PREFIX).ok_or_else(|| {
                    crate::Error::InvalidId(format!("expected {} prefix: {s:?}", Self::PREFIX))
                })?;
                if suffix.is_empty()
                    || suffix.len() > 64
                    || !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
                {
                    return Err(crate::Error::InvalidId(format!("malformed id: {s:?}")));
                }
                Ok(Self(s.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = crate::Error;

            fn try_from(value: String) -> crate::Result<Self> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

prefixed_id!(
    /// Identifier of a depot, `depot:...`.
    DepotId,
    "depot:"
);

prefixed_id!(
    /// Identifier of a ticket, `ticket:...`. Presenting it is how a ticket authenticates.
    TicketId,
    "ticket:"
);

prefixed_id!(
    /// Identifier of a stored user or agent token, `token:...`.
    TokenId,
    "token:"
);
