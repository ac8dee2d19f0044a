//! Password history ledger.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::account::AccountId;
use crate::ports::PasswordHasher;

/// Past password of an account. Entries are never updated nor removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordHistoryEntry {
    pub id: Uuid,
    #[serde(skip)]
    pub owner_id: AccountId,
    #[serde(skip)]
    pub(crate) password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl PasswordHistoryEntry {
    pub fn new(
        owner_id: AccountId,
        password_hash: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            password_hash: password_hash.into(),
            created_at,
        }
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }
}

/// Find the first entry, in ledger order, whose hash matches `candidate`.
pub fn find_reused<'a>(
    entries: &'a [PasswordHistoryEntry],
    hasher: &dyn PasswordHasher,
    candidate: &str,
) -> Option<&'a PasswordHistoryEntry> {
    entries
        .iter()
        .find(|entry| hasher.verify(candidate, &entry.password_hash))
}
