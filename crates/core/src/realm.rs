//! Realms: per-user isolated namespaces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every user realm.
pub const REALM_PREFIX: &str = "usr_";

/// Alias a caller may use for its own home realm.
pub const SELF_ALIAS: &str = "@me";

const MAX_USER_ID_LEN: usize = 128;

/// A tenant namespace, `usr_{userId}`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Realm(String);

impl Realm {
    /// The home realm of a user.
    pub fn for_user(user_id: &str) -> crate::Result<Self> {
        validate_user_id(user_id)?;
        Ok(Self(format!("{REALM_PREFIX}{user_id}")))
    }

    /// Parse an explicit realm name. The `@me` alias is resolved by the caller's identity.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let user_id = s
            .strip_prefix(REALM_PREFIX)
            .ok_or_else(|| crate::Error::InvalidRealm(format!("missing {REALM_PREFIX} prefix: {s:?}")))?;
        validate_user_id(user_id)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The user owning this realm.
    pub fn user_id(&self) -> &str {
        &self.0[REALM_PREFIX.len()..]
    }
}

fn validate_user_id(user_id: &str) -> crate::Result<()> {
    if user_id.is_empty()
        || user_id.len() > MAX_USER_ID_LEN
        || !user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '@' | '|' | ':'))
    {
        return Err(crate::Error::InvalidRealm(format!(
            "invalid user id: {user_id:?}"
        )));
    }
    Ok(())
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Realm({})", self.0)
    }
}

impl TryFrom<String> for Realm {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<Realm> for String {
    fn from(realm: Realm) -> Self {
        realm.0
    }
}
