//! Profile use cases of an authenticated account holder.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use validator::{ValidationError, ValidationErrors};

use crate::account::error::{AccountError, Result};
use crate::account::{
    AccountAggregate, AccountId, AccountRepository, Avatar, ContactId, ContactKind,
    ContactMethod, Gender, PasswordHistoryEntry, ProfileUpdate,
};
use crate::crypto::{EMAIL_TOKEN_BYTES, PHONE_CODE_DIGITS, numeric_code, random_token};
use crate::ports::{Clock, Notifier, PasswordHasher};
use crate::view::{AccountView, Audience, ViewProjection};

const MAX_FIELD_LENGTH: usize = 255;

/// Profile field open to mass assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    FirstName,
    LastName,
    Gender,
    Birthday,
    Timezone,
    Country,
}

/// Accepted request keys. Anything else is ignored.
pub const USER_DATA_FIELDS: &[(&str, ProfileField)] = &[
    ("firstName", ProfileField::FirstName),
    ("first_name", ProfileField::FirstName),
    ("lastName", ProfileField::LastName),
    ("last_name", ProfileField::LastName),
    ("gender", ProfileField::Gender),
    ("birthday", ProfileField::Birthday),
    ("timezone", ProfileField::Timezone),
    ("country", ProfileField::Country),
];

fn field_error(errors: &mut ValidationErrors, key: &str, code: &'static str, message: &'static str) {
    // `ValidationErrors::add` wants a static field name.
    let field = USER_DATA_FIELDS
        .iter()
        .find(|(name, _)| *name == key)
        .map_or("body", |(name, _)| *name);
    errors.add(field, ValidationError::new(code).with_message(message.into()));
}

fn text(value: &Value) -> std::result::Result<Option<String>, &'static str> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.chars().count() > MAX_FIELD_LENGTH => {
            Err("Value must be at most 255 characters long.")
        },
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_owned())),
        _ => Err("Value must be a string."),
    }
}

/// Map a JSON object onto permitted profile updates.
pub fn parse_user_data(body: &Map<String, Value>) -> std::result::Result<Vec<ProfileUpdate>, ValidationErrors> {
    let mut updates = Vec::new();
    let mut errors = ValidationErrors::new();

    for (key, value) in body {
        let Some((_, field)) = USER_DATA_FIELDS.iter().find(|(name, _)| name == key) else {
            tracing::trace!(%key, "ignored profile key");
            continue;
        };

        let update = match field {
            ProfileField::FirstName => text(value).map(ProfileUpdate::FirstName),
            ProfileField::LastName => text(value).map(ProfileUpdate::LastName),
            ProfileField::Timezone => text(value).map(ProfileUpdate::Timezone),
            ProfileField::Country => text(value).map(ProfileUpdate::Country),
            ProfileField::Gender => match value {
                Value::Null => Ok(ProfileUpdate::Gender(Gender::Unknown)),
                Value::String(s) if matches!(s.as_str(), "male" | "female" | "unknown") => {
                    Ok(ProfileUpdate::Gender(Gender::parse(s)))
                },
                _ => Err("Gender must be 'male', 'female' or 'unknown'."),
            },
            ProfileField::Birthday => match value {
                Value::Null => Ok(ProfileUpdate::Birthday(None)),
                Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(|date| ProfileUpdate::Birthday(Some(date)))
                    .map_err(|_| "Birthday must be formatted as YYYY-MM-DD."),
                _ => Err("Birthday must be formatted as YYYY-MM-DD."),
            },
        };

        match update {
            Ok(update) => updates.push(update),
            Err(message) => field_error(&mut errors, key, "invalid", message),
        }
    }

    if errors.is_empty() {
        Ok(updates)
    } else {
        Err(errors)
    }
}

/// New password, as selected by the request shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordChange {
    /// Overwrite without checks.
    Direct { password: String },
    /// Checked against the current password and the ledger.
    Change { current: String, new: String },
}

/// Ledger first, then the current password.
fn check_change(
    hasher: &dyn PasswordHasher,
    aggregate: &AccountAggregate,
    current: &str,
    new: &str,
) -> Result<()> {
    if let Some(entry) = aggregate.has_used_password(hasher, new) {
        return Err(AccountError::PasswordReuse {
            added_at: entry.created_at,
        });
    }
    if !hasher.verify(current, aggregate.account().password_hash()) {
        return Err(AccountError::WrongCurrentPassword);
    }
    Ok(())
}

/// Email or phone to attach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewContact {
    pub value: String,
    pub label: Option<String>,
    pub public: bool,
    /// Promote even if a main contact already exists.
    pub main: bool,
}

/// Orchestrates account use cases.
#[derive(Clone)]
pub struct ProfileService {
    repo: Arc<dyn AccountRepository>,
    hasher: Arc<dyn PasswordHasher>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    view: ViewProjection,
}

impl ProfileService {
    /// Create a new [`ProfileService`].
    pub fn new(
        repo: Arc<dyn AccountRepository>,
        hasher: Arc<dyn PasswordHasher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        view: ViewProjection,
    ) -> Self {
        Self {
            repo,
            hasher,
            notifier,
            clock,
            view,
        }
    }

    /// Run `f` in a unit of work and commit.
    async fn mutate<T, F>(&self, id: AccountId, f: F) -> Result<(AccountAggregate, T)>
    where
        F: FnOnce(&mut AccountAggregate) -> Result<T> + Send,
        T: Send,
    {
        let mut uow = self.repo.begin(id).await?;
        let out = f(uow.aggregate())?;
        uow.aggregate().touch(self.clock.now());
        let aggregate = uow.commit().await?;

        Ok((aggregate, out))
    }

    fn owner_view(&self, aggregate: &AccountAggregate) -> AccountView {
        self.view.project(aggregate, Audience::Owner)
    }

    pub async fn get(&self, id: AccountId) -> Result<AccountView> {
        let aggregate = self.repo.find(id).await?.ok_or(AccountError::NotFound)?;
        Ok(self.owner_view(&aggregate))
    }

    /// Public profile.
    pub async fn get_by_nickname(&self, nickname: &str) -> Result<AccountView> {
        let aggregate = self
            .repo
            .find_by_nickname(nickname)
            .await?
            .ok_or(AccountError::NotFound)?;
        Ok(self.view.project(&aggregate, Audience::Public))
    }

    pub async fn set_password(&self, id: AccountId, change: PasswordChange) -> Result<AccountView> {
        match change {
            PasswordChange::Direct { password } => self.set_password_direct(id, &password).await,
            PasswordChange::Change { current, new } => self.change_password(id, &current, &new).await,
        }
    }

    /// Replace the password after checking the ledger, then the current password.
    ///
    /// Checks and hashing run on an unlocked snapshot. Under the lock they
    /// are repeated only when the password or ledger moved in between.
    pub async fn change_password(&self, id: AccountId, current: &str, new: &str) -> Result<AccountView> {
        let hasher = Arc::clone(&self.hasher);
        let now = self.clock.now();

        let snapshot = self.repo.find(id).await?.ok_or(AccountError::NotFound)?;
        check_change(hasher.as_ref(), &snapshot, current, new)?;
        let hash = hasher.hash(new)?;
        let seen_hash = snapshot.account().password_hash().to_owned();
        let seen_len = snapshot.history().len();

        let (aggregate, ()) = self
            .mutate(id, |agg| {
                if agg.account().password_hash() != seen_hash || agg.history().len() != seen_len {
                    tracing::debug!(account_id = %id, "password moved since snapshot, checking again");
                    check_change(hasher.as_ref(), agg, current, new)?;
                }

                agg.record_password(&hash, now);
                agg.set_password_hash(hash);
                Ok(())
            })
            .await?;

        metrics::counter!("password_changes_total", "kind" => "change").increment(1);
        tracing::info!(account_id = %id, "password changed");

        Ok(self.owner_view(&aggregate))
    }

    /// Overwrite the password. Nothing is written to the ledger.
    pub async fn set_password_direct(&self, id: AccountId, password: &str) -> Result<AccountView> {
        let hash = self.hasher.hash(password)?;
        let (aggregate, ()) = self
            .mutate(id, |agg| {
                agg.set_password_hash(hash);
                Ok(())
            })
            .await?;

        metrics::counter!("password_changes_total", "kind" => "direct").increment(1);
        tracing::info!(account_id = %id, "password set");

        Ok(self.owner_view(&aggregate))
    }

    pub async fn set_user_data(&self, id: AccountId, updates: Vec<ProfileUpdate>) -> Result<AccountView> {
        let (aggregate, ()) = self
            .mutate(id, |agg| {
                agg.set_user_data(&updates);
                Ok(())
            })
            .await?;

        Ok(self.owner_view(&aggregate))
    }

    pub async fn set_avatar(&self, id: AccountId, avatar: Option<Avatar>) -> Result<AccountView> {
        let (aggregate, ()) = self
            .mutate(id, |agg| {
                agg.set_avatar(avatar);
                Ok(())
            })
            .await?;

        Ok(self.owner_view(&aggregate))
    }

    pub async fn add_email(&self, id: AccountId, email: NewContact) -> Result<AccountView> {
        self.add_contact(id, ContactKind::Email, email).await
    }

    pub async fn add_phone(&self, id: AccountId, phone: NewContact) -> Result<AccountView> {
        self.add_contact(id, ContactKind::Phone, phone).await
    }

    async fn add_contact(&self, id: AccountId, kind: ContactKind, new: NewContact) -> Result<AccountView> {
        let secret = match kind {
            ContactKind::Email => random_token(EMAIL_TOKEN_BYTES),
            ContactKind::Phone => numeric_code(PHONE_CODE_DIGITS),
        };
        let now = self.clock.now();

        let (aggregate, contact) = self
            .mutate(id, |agg| {
                let NewContact {
                    value,
                    label,
                    public,
                    main,
                } = new;
                let contact: ContactMethod = match kind {
                    ContactKind::Email => agg.add_email(&value, label, public, secret.clone(), now)?,
                    ContactKind::Phone => agg.add_phone(&value, label, public, secret.clone(), now)?,
                }
                .clone();

                if main {
                    match kind {
                        ContactKind::Email => agg.set_main_email(contact.id),
                        ContactKind::Phone => agg.set_main_phone(contact.id),
                    }
                }
                Ok(contact)
            })
            .await?;

        metrics::counter!("contact_methods_total", "kind" => kind.as_str(), "action" => "add")
            .increment(1);
        tracing::debug!(account_id = %id, contact_id = %contact.id, %kind, "contact added");

        if let Err(err) = self.notifier.send_verification(&contact, &secret).await {
            tracing::warn!(error = %err, contact_id = %contact.id, "verification not sent");
        }

        Ok(self.owner_view(&aggregate))
    }

    pub async fn remove_email(&self, id: AccountId, contact: ContactId) -> Result<AccountView> {
        let (aggregate, _) = self.mutate(id, |agg| agg.delete_email(contact)).await?;

        metrics::counter!("contact_methods_total", "kind" => "email", "action" => "remove")
            .increment(1);
        Ok(self.owner_view(&aggregate))
    }

    pub async fn remove_phone(&self, id: AccountId, contact: ContactId) -> Result<AccountView> {
        let (aggregate, _) = self.mutate(id, |agg| agg.delete_phone(contact)).await?;

        metrics::counter!("contact_methods_total", "kind" => "phone", "action" => "remove")
            .increment(1);
        Ok(self.owner_view(&aggregate))
    }

    pub async fn set_main_email(&self, id: AccountId, contact: ContactId) -> Result<AccountView> {
        let (aggregate, ()) = self
            .mutate(id, |agg| {
                if agg.contact(ContactKind::Email, contact).is_none() {
                    return Err(AccountError::NotFound);
                }
                agg.set_main_email(contact);
                Ok(())
            })
            .await?;

        Ok(self.owner_view(&aggregate))
    }

    pub async fn set_main_phone(&self, id: AccountId, contact: ContactId) -> Result<AccountView> {
        let (aggregate, ()) = self
            .mutate(id, |agg| {
                if agg.contact(ContactKind::Phone, contact).is_none() {
                    return Err(AccountError::NotFound);
                }
                agg.set_main_phone(contact);
                Ok(())
            })
            .await?;

        Ok(self.owner_view(&aggregate))
    }

    pub async fn set_contact_visibility(
        &self,
        id: AccountId,
        kind: ContactKind,
        contact: ContactId,
        public: bool,
    ) -> Result<AccountView> {
        let (aggregate, ()) = self
            .mutate(id, |agg| agg.set_visibility(kind, contact, public))
            .await?;

        Ok(self.owner_view(&aggregate))
    }

    pub async fn verify_contact(
        &self,
        id: AccountId,
        kind: ContactKind,
        contact: ContactId,
        secret: &str,
    ) -> Result<AccountView> {
        let (aggregate, ()) = self
            .mutate(id, |agg| agg.verify_contact(kind, contact, secret))
            .await?;

        tracing::debug!(account_id = %id, contact_id = %contact, "contact verified");
        Ok(self.owner_view(&aggregate))
    }

    /// Ledger entries, oldest first.
    pub async fn password_history(&self, id: AccountId) -> Result<Vec<PasswordHistoryEntry>> {
        let aggregate = self.repo.find(id).await?.ok_or(AccountError::NotFound)?;
        Ok(aggregate.history().to_vec())
    }
}
