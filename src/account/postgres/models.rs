//! Database models for PostgreSQL.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use crate::account::error::{AccountError, Result};
use crate::account::{
    Account, AccountId, Avatar, ContactId, ContactKind, ContactMethod, Gender,
    PasswordHistoryEntry,
};

pub const ACCOUNT_COLUMNS: &str = r#"
    id, nickname, password_hash, first_name, last_name, gender, birthday,
    country, timezone, avatar, main_email_id, main_phone_id,
    created_at, updated_at
"#;

/// Account record as stored in the database.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRecord {
    pub id: Uuid,
    pub nickname: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: String,
    pub birthday: Option<NaiveDate>,
    pub country: Option<String>,
    pub timezone: Option<String>,
    pub avatar: Option<Json<Avatar>>,
    pub main_email_id: Option<Uuid>,
    pub main_phone_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Email or phone record.
#[derive(Debug, Clone, FromRow)]
pub struct ContactRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: String,
    pub value: String,
    pub label: Option<String>,
    pub public: bool,
    pub verified: bool,
    pub verification_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Password history record.
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl From<AccountRecord> for Account {
    fn from(record: AccountRecord) -> Self {
        Self {
            id: AccountId::from(record.id),
            nickname: record.nickname,
            password_hash: record.password_hash,
            first_name: record.first_name,
            last_name: record.last_name,
            gender: Gender::parse(&record.gender),
            birthday: record.birthday,
            country: record.country,
            timezone: record.timezone,
            avatar: record.avatar.map(|Json(avatar)| avatar),
            main_email_id: record.main_email_id.map(ContactId::from),
            main_phone_id: record.main_phone_id.map(ContactId::from),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl ContactRecord {
    /// Convert to [`ContactMethod`].
    pub fn try_into_contact(self) -> Result<ContactMethod> {
        let kind = ContactKind::parse(&self.kind).ok_or_else(|| {
            AccountError::Internal(
                format!("unknown contact kind '{}'", self.kind).into(),
            )
        })?;

        Ok(ContactMethod {
            id: ContactId::from(self.id),
            owner_id: AccountId::from(self.owner_id),
            kind,
            value: self.value,
            label: self.label,
            public: self.public,
            verified: self.verified,
            verification_secret: self.verification_secret,
            created_at: self.created_at,
        })
    }
}

impl From<HistoryRecord> for PasswordHistoryEntry {
    fn from(record: HistoryRecord) -> Self {
        Self {
            id: record.id,
            owner_id: AccountId::from(record.owner_id),
            password_hash: record.password_hash,
            created_at: record.created_at,
        }
    }
}
