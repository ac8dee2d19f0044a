//! Serialized account, as returned by the HTTP API.

use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::account::{AccountAggregate, AccountId, Avatar, ContactId, ContactMethod, Gender};
use crate::config::View as ViewConfig;
use crate::ports::Clock;

const FALLBACK_DATE_FORMAT: &str = "%Y-%m-%d";

/// Who is looking at the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// The account holder.
    Owner,
    /// Anybody else. Private contacts are hidden.
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactView {
    pub id: ContactId,
    pub value: String,
    pub label: Option<String>,
    pub public: bool,
    pub verified: bool,
}

impl From<&ContactMethod> for ContactView {
    fn from(contact: &ContactMethod) -> Self {
        Self {
            id: contact.id,
            value: contact.value.clone(),
            label: contact.label.clone(),
            public: contact.public,
            verified: contact.verified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: AccountId,
    pub nickname: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub gender: Gender,
    pub birthday: Option<String>,
    pub age: Option<u32>,
    pub country: Option<String>,
    pub timezone: Option<String>,
    pub avatar: Option<Avatar>,
    pub activated: bool,
    pub locale: String,
    pub main_email: Option<ContactView>,
    pub main_phone: Option<ContactView>,
    pub emails: Vec<ContactView>,
    pub phones: Vec<ContactView>,
}

/// Builds [`AccountView`]s with a fixed locale and date format.
#[derive(Clone)]
pub struct ViewProjection {
    locale: String,
    date_format: String,
    clock: Arc<dyn Clock>,
}

impl ViewProjection {
    /// Create a new [`ViewProjection`].
    ///
    /// An unparsable date format falls back to ISO 8601.
    pub fn new(config: &ViewConfig, clock: Arc<dyn Clock>) -> Self {
        let date_format = if StrftimeItems::new(&config.date_format).any(|i| i == Item::Error) {
            tracing::warn!(format = config.date_format, "invalid `view.date_format`, using default");
            FALLBACK_DATE_FORMAT.to_owned()
        } else {
            config.date_format.clone()
        };

        Self {
            locale: config.locale.clone(),
            date_format,
            clock,
        }
    }

    pub fn project(&self, aggregate: &AccountAggregate, audience: Audience) -> AccountView {
        let account = aggregate.account();
        let visible = |c: &&ContactMethod| audience == Audience::Owner || c.public;

        AccountView {
            id: account.id,
            nickname: account.nickname.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            full_name: account.full_name(),
            gender: account.gender,
            birthday: account
                .birthday
                .map(|b| b.format(&self.date_format).to_string()),
            age: account.age_on(self.clock.today()),
            country: account.country.clone(),
            timezone: account.timezone.clone(),
            avatar: account.avatar.clone(),
            activated: aggregate.activated(),
            locale: self.locale.clone(),
            main_email: aggregate.main_email().filter(visible).map(ContactView::from),
            main_phone: aggregate.main_phone().filter(visible).map(ContactView::from),
            emails: aggregate.emails().filter(visible).map(ContactView::from).collect(),
            phones: aggregate.phones().filter(visible).map(ContactView::from).collect(),
        }
    }
}
