//! Emails and phones owned by an account.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::AccountId;

/// Value object identifying a contact method.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContactId(Uuid);

impl ContactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContactId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ContactId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for ContactId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of contact method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Email,
    Phone,
}

impl ContactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Self::Email),
            "phone" => Some(Self::Phone),
            _ => None,
        }
    }

    /// Normalize a raw value so that uniqueness checks are stable.
    ///
    /// Emails are trimmed and lowercased, phones lose every separator.
    pub fn normalize(&self, value: &str) -> String {
        match self {
            Self::Email => value.trim().to_lowercase(),
            Self::Phone => value
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '+')
                .collect(),
        }
    }
}

impl fmt::Display for ContactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An email or a phone number owned by exactly one account.
#[derive(Clone, PartialEq, Eq)]
pub struct ContactMethod {
    pub id: ContactId,
    pub owner_id: AccountId,
    pub kind: ContactKind,
    pub value: String,
    pub label: Option<String>,
    pub public: bool,
    pub verified: bool,
    /// Single-use verification token (emails) or code (phones).
    pub(crate) verification_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContactMethod {
    /// Create an unverified [`ContactMethod`].
    pub fn new(
        owner_id: AccountId,
        kind: ContactKind,
        value: impl Into<String>,
        label: Option<String>,
        public: bool,
        verification_secret: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ContactId::new(),
            owner_id,
            kind,
            value: value.into(),
            label,
            public,
            verified: false,
            verification_secret: Some(verification_secret.into()),
            created_at,
        }
    }

    /// Pending verification secret, if any.
    pub fn verification_secret(&self) -> Option<&str> {
        self.verification_secret.as_deref()
    }

    /// Consume the verification secret.
    ///
    /// Returns `false` when the secret does not match or was already used.
    pub fn confirm(&mut self, secret: &str) -> bool {
        match self.verification_secret.as_deref() {
            Some(expected) if expected == secret => {
                self.verification_secret = None;
                self.verified = true;
                true
            },
            _ => false,
        }
    }
}

impl fmt::Debug for ContactMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContactMethod")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("label", &self.label)
            .field("public", &self.public)
            .field("verified", &self.verified)
            .field("verification_secret", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(
            ContactKind::Email.normalize("  John.Doe@Example.COM "),
            "john.doe@example.com"
        );
        assert_eq!(
            ContactKind::Phone.normalize("+33 6 12-34.56 78"),
            "+33612345678"
        );
    }

    #[test]
    fn test_confirm_is_single_use() {
        let mut phone = ContactMethod::new(
            AccountId::new(),
            ContactKind::Phone,
            "+33612345678",
            None,
            false,
            "123456",
            Utc::now(),
        );

        assert!(!phone.confirm("000000"));
        assert!(!phone.verified);

        assert!(phone.confirm("123456"));
        assert!(phone.verified);
        assert_eq!(phone.verification_secret(), None);

        assert!(!phone.confirm("123456"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let email = ContactMethod::new(
            AccountId::new(),
            ContactKind::Email,
            "a@b.c",
            None,
            true,
            "super-secret",
            Utc::now(),
        );
        assert!(!format!("{email:?}").contains("super-secret"));
    }
}
