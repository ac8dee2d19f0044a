//! Consistency boundary around one account.

use chrono::{DateTime, NaiveDate, Utc};

use crate::account::error::{AccountError, Result};
use crate::account::{
    Account, AccountId, Avatar, ContactId, ContactKind, ContactMethod, Gender,
    PasswordHistoryEntry, find_reused,
};
use crate::ports::PasswordHasher;

/// One permitted profile field and its new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileUpdate {
    FirstName(Option<String>),
    LastName(Option<String>),
    Gender(Gender),
    Birthday(Option<NaiveDate>),
    Timezone(Option<String>),
    Country(Option<String>),
}

/// What the password reset flow needs from an account.
pub trait CanResetPassword {
    /// Address the reset was requested for, or the main email.
    fn email_for_password_reset(&self) -> Option<&str>;

    fn set_email_for_password_reset(&mut self, email: String);

    /// Replace the password hash without touching the ledger.
    fn overwrite_password(&mut self, hash: String);
}

/// Account plus everything owned by it.
///
/// Contacts are kept in creation order.
#[derive(Debug, Clone)]
pub struct AccountAggregate {
    account: Account,
    contacts: Vec<ContactMethod>,
    history: Vec<PasswordHistoryEntry>,
    linked_identities: u32,
    email_for_reset: Option<String>,
    removed_contacts: Vec<ContactId>,
    persisted_history: usize,
}

impl AccountAggregate {
    /// Fresh aggregate, nothing stored yet.
    pub fn new(account: Account) -> Self {
        Self::from_parts(account, Vec::new(), Vec::new(), 0)
    }

    /// Rebuild an aggregate loaded from storage.
    pub fn from_parts(
        account: Account,
        mut contacts: Vec<ContactMethod>,
        history: Vec<PasswordHistoryEntry>,
        linked_identities: u32,
    ) -> Self {
        contacts.sort_by_key(|c| c.created_at);

        Self {
            account,
            contacts,
            persisted_history: history.len(),
            history,
            linked_identities,
            email_for_reset: None,
            removed_contacts: Vec::new(),
        }
    }

    pub fn id(&self) -> AccountId {
        self.account.id
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn contacts(&self) -> &[ContactMethod] {
        &self.contacts
    }

    pub fn emails(&self) -> impl Iterator<Item = &ContactMethod> {
        self.of_kind(ContactKind::Email)
    }

    pub fn phones(&self) -> impl Iterator<Item = &ContactMethod> {
        self.of_kind(ContactKind::Phone)
    }

    fn of_kind(&self, kind: ContactKind) -> impl Iterator<Item = &ContactMethod> {
        self.contacts.iter().filter(move |c| c.kind == kind)
    }

    /// Owned contact of `kind` with `id`.
    pub fn contact(&self, kind: ContactKind, id: ContactId) -> Option<&ContactMethod> {
        self.contacts.iter().find(|c| c.kind == kind && c.id == id)
    }

    fn contact_mut(
        &mut self,
        kind: ContactKind,
        id: ContactId,
    ) -> Result<&mut ContactMethod> {
        self.contacts
            .iter_mut()
            .find(|c| c.kind == kind && c.id == id)
            .ok_or(AccountError::NotFound)
    }

    pub fn main_email(&self) -> Option<&ContactMethod> {
        self.account
            .main_email_id
            .and_then(|id| self.contact(ContactKind::Email, id))
    }

    pub fn main_phone(&self) -> Option<&ContactMethod> {
        self.account
            .main_phone_id
            .and_then(|id| self.contact(ContactKind::Phone, id))
    }

    fn main_of(&self, kind: ContactKind) -> Option<ContactId> {
        match kind {
            ContactKind::Email => self.account.main_email_id,
            ContactKind::Phone => self.account.main_phone_id,
        }
    }

    fn set_main_of(&mut self, kind: ContactKind, id: Option<ContactId>) {
        match kind {
            ContactKind::Email => self.account.main_email_id = id,
            ContactKind::Phone => self.account.main_phone_id = id,
        }
    }

    /// At least one verified email, or a linked external identity.
    pub fn activated(&self) -> bool {
        self.linked_identities > 0 || self.emails().any(|e| e.verified)
    }

    /// Merge permitted profile fields.
    pub fn set_user_data(&mut self, updates: &[ProfileUpdate]) {
        for update in updates {
            match update.clone() {
                ProfileUpdate::FirstName(value) => self.account.first_name = value,
                ProfileUpdate::LastName(value) => self.account.last_name = value,
                ProfileUpdate::Gender(value) => self.account.gender = value,
                ProfileUpdate::Birthday(value) => self.account.birthday = value,
                ProfileUpdate::Timezone(value) => self.account.timezone = value,
                ProfileUpdate::Country(value) => self.account.country = value,
            }
        }
    }

    /// Caller must have checked that `id` is an owned email.
    pub fn set_main_email(&mut self, id: ContactId) {
        self.account.main_email_id = Some(id);
    }

    /// Caller must have checked that `id` is an owned phone.
    pub fn set_main_phone(&mut self, id: ContactId) {
        self.account.main_phone_id = Some(id);
    }

    pub fn set_avatar(&mut self, avatar: Option<Avatar>) {
        self.account.avatar = avatar;
    }

    pub fn add_email(
        &mut self,
        value: &str,
        label: Option<String>,
        public: bool,
        secret: String,
        now: DateTime<Utc>,
    ) -> Result<&ContactMethod> {
        self.add_contact(ContactKind::Email, value, label, public, secret, now)
    }

    pub fn add_phone(
        &mut self,
        value: &str,
        label: Option<String>,
        public: bool,
        secret: String,
        now: DateTime<Utc>,
    ) -> Result<&ContactMethod> {
        self.add_contact(ContactKind::Phone, value, label, public, secret, now)
    }

    /// Append an unverified contact. It becomes main when none exists yet.
    fn add_contact(
        &mut self,
        kind: ContactKind,
        value: &str,
        label: Option<String>,
        public: bool,
        secret: String,
        now: DateTime<Utc>,
    ) -> Result<&ContactMethod> {
        let value = kind.normalize(value);
        if self.of_kind(kind).any(|c| c.value == value) {
            return Err(AccountError::ContactTaken);
        }

        let contact =
            ContactMethod::new(self.account.id, kind, value, label, public, secret, now);
        let id = contact.id;
        self.contacts.push(contact);

        if self.main_of(kind).is_none() {
            self.set_main_of(kind, Some(id));
        }

        let index = self.contacts.len() - 1;
        Ok(&self.contacts[index])
    }

    /// Remove a non-main email.
    pub fn delete_email(&mut self, id: ContactId) -> Result<ContactMethod> {
        if self.contact(ContactKind::Email, id).is_none() {
            return Err(AccountError::NotFound);
        }
        if self.account.main_email_id == Some(id) {
            return Err(AccountError::MainContactProtected);
        }

        Ok(self.remove(id))
    }

    /// Remove a phone, promoting the oldest remaining one when main is lost.
    pub fn delete_phone(&mut self, id: ContactId) -> Result<ContactMethod> {
        if self.contact(ContactKind::Phone, id).is_none() {
            return Err(AccountError::NotFound);
        }

        let removed = self.remove(id);
        let main = self.account.main_phone_id;
        if main.is_none() || main == Some(id) {
            let next = self.phones().next().map(|p| p.id);
            self.account.main_phone_id = next;
        }

        Ok(removed)
    }

    fn remove(&mut self, id: ContactId) -> ContactMethod {
        let index = self
            .contacts
            .iter()
            .position(|c| c.id == id)
            .unwrap_or_default();
        self.removed_contacts.push(id);
        self.contacts.remove(index)
    }

    pub fn set_visibility(
        &mut self,
        kind: ContactKind,
        id: ContactId,
        public: bool,
    ) -> Result<()> {
        self.contact_mut(kind, id)?.public = public;
        Ok(())
    }

    /// Consume the verification secret of a contact.
    pub fn verify_contact(
        &mut self,
        kind: ContactKind,
        id: ContactId,
        secret: &str,
    ) -> Result<()> {
        if self.contact_mut(kind, id)?.confirm(secret) {
            Ok(())
        } else {
            Err(AccountError::InvalidToken)
        }
    }

    /// Ledger, oldest first.
    pub fn history(&self) -> &[PasswordHistoryEntry] {
        &self.history
    }

    pub fn has_used_password(
        &self,
        hasher: &dyn PasswordHasher,
        candidate: &str,
    ) -> Option<&PasswordHistoryEntry> {
        find_reused(&self.history, hasher, candidate)
    }

    /// Append `hash` to the ledger.
    pub fn record_password(&mut self, hash: &str, now: DateTime<Utc>) {
        self.history
            .push(PasswordHistoryEntry::new(self.account.id, hash, now));
    }

    pub fn set_password_hash(&mut self, hash: String) {
        self.account.password_hash = hash;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.account.updated_at = now;
    }

    pub(crate) fn removed_contacts(&self) -> &[ContactId] {
        &self.removed_contacts
    }

    /// Ledger entries appended since load.
    pub(crate) fn new_history(&self) -> &[PasswordHistoryEntry] {
        &self.history[self.persisted_history.min(self.history.len())..]
    }

    /// Forget pending changes once they are stored.
    pub(crate) fn mark_persisted(&mut self) {
        self.removed_contacts.clear();
        self.persisted_history = self.history.len();
        self.email_for_reset = None;
    }
}

impl CanResetPassword for AccountAggregate {
    fn email_for_password_reset(&self) -> Option<&str> {
        self.email_for_reset
            .as_deref()
            .or_else(|| self.main_email().map(|e| e.value.as_str()))
    }

    fn set_email_for_password_reset(&mut self, email: String) {
        self.email_for_reset = Some(email);
    }

    fn overwrite_password(&mut self, hash: String) {
        self.set_password_hash(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate() -> AccountAggregate {
        AccountAggregate::new(Account::new("jdoe", "hash", Utc::now()))
    }

    fn add_email(agg: &mut AccountAggregate, value: &str) -> ContactId {
        agg.add_email(value, None, false, "secret".into(), Utc::now())
            .unwrap()
            .id
    }

    fn add_phone(agg: &mut AccountAggregate, value: &str) -> ContactId {
        agg.add_phone(value, None, false, "123456".into(), Utc::now())
            .unwrap()
            .id
    }

    #[test]
    fn test_activated_truth_table() {
        for (verified, identities, expected) in [
            (false, 0, false),
            (true, 0, true),
            (false, 1, true),
            (true, 1, true),
        ] {
            let mut agg = aggregate();
            let id = add_email(&mut agg, "a@example.com");
            if verified {
                agg.verify_contact(ContactKind::Email, id, "secret").unwrap();
            }
            let agg = AccountAggregate::from_parts(
                agg.account().clone(),
                agg.contacts().to_vec(),
                Vec::new(),
                identities,
            );

            assert_eq!(
                agg.activated(),
                expected,
                "verified={verified} identities={identities}"
            );
        }
    }

    #[test]
    fn test_delete_main_email_is_rejected() {
        let mut agg = aggregate();
        let main = add_email(&mut agg, "a@example.com");
        let other = add_email(&mut agg, "b@example.com");

        assert!(matches!(
            agg.delete_email(main),
            Err(AccountError::MainContactProtected)
        ));
        assert_eq!(agg.account().main_email_id, Some(main));
        assert_eq!(agg.emails().count(), 2);

        agg.delete_email(other).unwrap();
        assert_eq!(agg.account().main_email_id, Some(main));
        assert_eq!(agg.removed_contacts(), &[other]);
    }

    #[test]
    fn test_delete_main_phone_promotes_oldest() {
        let mut agg = aggregate();
        let first = add_phone(&mut agg, "+33600000001");
        let second = add_phone(&mut agg, "+33600000002");
        let third = add_phone(&mut agg, "+33600000003");
        assert_eq!(agg.account().main_phone_id, Some(first));

        agg.delete_phone(first).unwrap();
        assert_eq!(agg.account().main_phone_id, Some(second));

        // Not main: untouched.
        agg.delete_phone(third).unwrap();
        assert_eq!(agg.account().main_phone_id, Some(second));

        agg.delete_phone(second).unwrap();
        assert_eq!(agg.account().main_phone_id, None);
    }

    #[test]
    fn test_add_promotes_only_without_main() {
        let mut agg = aggregate();
        let email = add_email(&mut agg, "a@example.com");
        add_email(&mut agg, "b@example.com");
        assert_eq!(agg.account().main_email_id, Some(email));

        let phone = add_phone(&mut agg, "+33600000001");
        add_phone(&mut agg, "+33600000002");
        assert_eq!(agg.account().main_phone_id, Some(phone));
    }

    #[test]
    fn test_add_duplicate_contact() {
        let mut agg = aggregate();
        add_email(&mut agg, "a@example.com");

        assert!(matches!(
            agg.add_email(" A@Example.com", None, true, "s".into(), Utc::now()),
            Err(AccountError::ContactTaken)
        ));
    }

    #[test]
    fn test_unknown_contact_is_not_found() {
        let mut agg = aggregate();
        let email = add_email(&mut agg, "a@example.com");

        // An email id is not a phone id.
        assert!(matches!(
            agg.delete_phone(email),
            Err(AccountError::NotFound)
        ));
        assert!(matches!(
            agg.set_visibility(ContactKind::Email, ContactId::new(), true),
            Err(AccountError::NotFound)
        ));
    }

    #[test]
    fn test_verify_contact() {
        let mut agg = aggregate();
        let email = add_email(&mut agg, "a@example.com");

        assert!(matches!(
            agg.verify_contact(ContactKind::Email, email, "nope"),
            Err(AccountError::InvalidToken)
        ));
        agg.verify_contact(ContactKind::Email, email, "secret").unwrap();
        assert!(agg.activated());
        assert!(matches!(
            agg.verify_contact(ContactKind::Email, email, "secret"),
            Err(AccountError::InvalidToken)
        ));
    }

    #[test]
    fn test_set_user_data_is_idempotent() {
        let updates = [
            ProfileUpdate::FirstName(Some("John".into())),
            ProfileUpdate::Gender(Gender::Male),
            ProfileUpdate::Birthday(NaiveDate::from_ymd_opt(1990, 1, 1)),
            ProfileUpdate::Country(Some("FR".into())),
        ];
        let mut agg = aggregate();

        agg.set_user_data(&updates);
        let once = agg.account().clone();
        agg.set_user_data(&updates);

        assert_eq!(agg.account(), &once);
        assert_eq!(once.first_name.as_deref(), Some("John"));
        assert_eq!(once.password_hash(), "hash");
    }

    #[test]
    fn test_new_history_tracks_appends() {
        let mut agg = aggregate();
        agg.record_password("h1", Utc::now());
        agg.mark_persisted();
        assert!(agg.new_history().is_empty());

        agg.record_password("h2", Utc::now());
        assert_eq!(agg.new_history().len(), 1);
        assert_eq!(agg.new_history()[0].password_hash(), "h2");
        assert_eq!(agg.history().len(), 2);
    }

    #[test]
    fn test_email_for_password_reset() {
        let mut agg = aggregate();
        assert_eq!(agg.email_for_password_reset(), None);

        add_email(&mut agg, "a@example.com");
        assert_eq!(agg.email_for_password_reset(), Some("a@example.com"));

        agg.set_email_for_password_reset("b@example.com".into());
        assert_eq!(agg.email_for_password_reset(), Some("b@example.com"));

        agg.overwrite_password("new".into());
        assert_eq!(agg.account().password_hash(), "new");
        assert!(agg.history().is_empty());
    }
}
