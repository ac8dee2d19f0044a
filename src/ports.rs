//! Collaborators the account core talks to.
//!
//! Adapters live in [`crate::crypto`], [`crate::token`] and [`crate::mail`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::account::error::Result;
use crate::account::{AccountId, ContactMethod};

/// Port for password hashing operations.
pub trait PasswordHasher: Send + Sync {
    /// Hash a password using a secure algorithm.
    fn hash(&self, plaintext: &str) -> Result<String>;

    /// Verify a password against a stored hash.
    ///
    /// Malformed hashes never match.
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

/// Issues and checks password reset tokens.
#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// Create a new token for `account`, replacing any previous one.
    async fn issue(&self, account: AccountId, email: &str) -> Result<String>;

    /// Whether `token` is the live token of `account`.
    async fn validate(&self, account: AccountId, token: &str) -> Result<bool>;

    /// Consume `token`. Unknown tokens are ignored.
    async fn invalidate(&self, account: AccountId, token: &str) -> Result<()>;

    /// Check and remove `token` in one step.
    ///
    /// At most one caller gets `true` for a given token.
    async fn consume(&self, account: AccountId, token: &str) -> Result<bool>;
}

/// Outgoing notifications.
///
/// Callers never surface errors from these methods to end users.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the verification secret of a new contact method.
    async fn send_verification(
        &self,
        contact: &ContactMethod,
        secret: &str,
    ) -> Result<()>;

    /// Deliver a password reset link to `email`.
    async fn send_password_reset_link(
        &self,
        email: &str,
        token: &str,
    ) -> Result<()>;

    /// Tell the user their password was reset.
    async fn notify_password_reset(
        &self,
        account: AccountId,
        email: &str,
    ) -> Result<()>;
}

/// Port for getting the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// System clock using the OS time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn at(rfc3339: &str) -> Self {
        Self::new(
            DateTime::parse_from_rfc3339(rfc3339)
                .expect("invalid date")
                .with_timezone(&Utc),
        )
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Predicate applied to new passwords during reset.
pub trait PasswordPolicy: Send + Sync {
    fn accepts(&self, password: &str) -> bool;
}

/// Accept every password.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl PasswordPolicy for AcceptAll {
    fn accepts(&self, _password: &str) -> bool {
        true
    }
}

/// Require at least `n` characters.
#[derive(Debug, Clone, Copy)]
pub struct MinLength(pub usize);

impl PasswordPolicy for MinLength {
    fn accepts(&self, password: &str) -> bool {
        password.chars().count() >= self.0
    }
}
