//! Account aggregate, owned contact methods and password history.

mod aggregate;
mod contact;
pub mod error;
mod history;
mod memory;
mod postgres;
mod repository;

pub use aggregate::*;
pub use contact::*;
pub use history::*;
pub use memory::InMemoryAccountRepository;
pub use postgres::PgAccountRepository;
pub use repository::*;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value object identifying an account.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    /// Generate a new random [`AccountId`].
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tri-state gender.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Unknown,
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Male => "male",
            Self::Female => "female",
        }
    }

    /// Parse the stored representation, unknown values fall back to
    /// [`Gender::Unknown`].
    pub fn parse(value: &str) -> Self {
        match value {
            "male" => Self::Male,
            "female" => Self::Female,
            _ => Self::Unknown,
        }
    }
}

/// Crop rectangle applied to the uploaded source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Avatar metadata. Upload and resizing happen outside of this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    pub url: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<Crop>,
}

/// Account as stored on database.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub nickname: String,
    pub(crate) password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Gender,
    pub birthday: Option<NaiveDate>,
    pub country: Option<String>,
    pub timezone: Option<String>,
    pub avatar: Option<Avatar>,
    pub main_email_id: Option<ContactId>,
    pub main_phone_id: Option<ContactId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new [`Account`] with an already hashed password.
    pub fn new(
        nickname: impl Into<String>,
        password_hash: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AccountId::new(),
            nickname: nickname.into(),
            password_hash: password_hash.into(),
            first_name: None,
            last_name: None,
            gender: Gender::Unknown,
            birthday: None,
            country: None,
            timezone: None,
            avatar: None,
            main_email_id: None,
            main_phone_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Hash of the current password.
    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    /// First and last name joined, only when both are known.
    pub fn full_name(&self) -> Option<String> {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) if !first.is_empty() && !last.is_empty() => {
                Some(format!("{first} {last}"))
            },
            _ => None,
        }
    }

    /// Age in whole years on `today`.
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        self.birthday.and_then(|birthday| today.years_since(birthday))
    }
}
