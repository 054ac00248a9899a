//! Tenant identifier type.
//!
//! [`TenantId`] is the opaque, stable key every scoped resource name is
//! derived from. Validation happens once at construction so downstream code
//! can splice the identifier into prefixes, paths and queue names without
//! re-checking it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum length of a tenant identifier, in bytes.
pub const MAX_TENANT_ID_LEN: usize = 64;

/// Errors from constructing a [`TenantId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TenantIdError {
    #[error("tenant id must not be empty")]
    Empty,
    #[error("tenant id exceeds {max} bytes: {len}")]
    TooLong { len: usize, max: usize },
    #[error("tenant id contains invalid character {ch:?}: {id}")]
    InvalidChar { id: String, ch: char },
}

/// Opaque, validated tenant identifier.
///
/// Accepts ASCII letters, digits, `_` and `-`. The same identifier always
/// derives the same scoped names, so the value is never normalized beyond
/// validation: `Acme` and `acme` are different tenants.
///
/// # Examples
///
/// ```
/// use switchyard_core::TenantId;
///
/// let tenant = TenantId::new("acme").unwrap();
/// assert_eq!(tenant.as_str(), "acme");
/// assert!(TenantId::new("acme/../etc").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant identifier, validating its characters and length.
    ///
    /// # Errors
    ///
    /// Returns [`TenantIdError`] if the identifier is empty, longer than
    /// [`MAX_TENANT_ID_LEN`], or contains a character outside `[A-Za-z0-9_-]`.
    pub fn new(id: impl Into<String>) -> Result<Self, TenantIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TenantIdError::Empty);
        }
        if id.len() > MAX_TENANT_ID_LEN {
            return Err(TenantIdError::TooLong {
                len: id.len(),
                max: MAX_TENANT_ID_LEN,
            });
        }
        if let Some(ch) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(TenantIdError::InvalidChar { id, ch });
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitutes this identifier for every `{tenant}` placeholder in `pattern`.
    ///
    /// ```
    /// use switchyard_core::TenantId;
    ///
    /// let tenant = TenantId::new("acme").unwrap();
    /// assert_eq!(tenant.substitute("tenant_{tenant}_"), "tenant_acme_");
    /// ```
    #[must_use]
    pub fn substitute(&self, pattern: &str) -> String {
        pattern.replace(TENANT_PLACEHOLDER, &self.0)
    }
}

/// Placeholder replaced by [`TenantId::substitute`].
pub const TENANT_PLACEHOLDER: &str = "{tenant}";

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = TenantIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantId {
    type Error = TenantIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
