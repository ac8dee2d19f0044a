//! Test doubles. MUST NEVER be used in production.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::account::error::Result;
use crate::account::{
    Account, AccountAggregate, AccountId, AccountRepository, ContactMethod,
    InMemoryAccountRepository,
};
use crate::auth::{AccessTokenVerifier, sign};
use crate::config::{Configuration, Token, View};
use crate::crypto::Hasher;
use crate::ports::{Clock, FixedClock, Notifier, PasswordHasher, SystemClock, TokenBroker};
use crate::token::MemoryTokenBroker;
use crate::view::ViewProjection;
use crate::{AppState, Collaborators};

/// Stores passwords as they are.
pub struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_owned())
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        plaintext == hash
    }
}

/// Keeps every notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    verifications: Mutex<Vec<(String, String)>>,
    links: Mutex<Vec<(String, String)>>,
    resets: Mutex<Vec<String>>,
    delay: Option<std::time::Duration>,
}

impl RecordingNotifier {
    /// Waits `delay` before recording a password reset notice.
    pub fn slow(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// `(contact value, secret)` pairs.
    pub fn verifications(&self) -> Vec<(String, String)> {
        self.verifications.lock().unwrap().clone()
    }

    /// `(email, token)` pairs.
    pub fn links(&self) -> Vec<(String, String)> {
        self.links.lock().unwrap().clone()
    }

    pub fn resets(&self) -> Vec<String> {
        self.resets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_verification(&self, contact: &ContactMethod, secret: &str) -> Result<()> {
        self.verifications
            .lock()
            .unwrap()
            .push((contact.value.clone(), secret.to_owned()));
        Ok(())
    }

    async fn send_password_reset_link(&self, email: &str, token: &str) -> Result<()> {
        self.links
            .lock()
            .unwrap()
            .push((email.to_owned(), token.to_owned()));
        Ok(())
    }

    async fn notify_password_reset(&self, _account: AccountId, email: &str) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.resets.lock().unwrap().push(email.to_owned());
        Ok(())
    }
}

/// Default projection with a clock frozen on 2024-06-15.
pub fn projection() -> (ViewProjection, Arc<dyn Clock>) {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::at("2024-06-15T10:00:00Z"));
    (ViewProjection::new(&View::default(), Arc::clone(&clock)), clock)
}

/// Secret accepted by [`TestApp`] for access tokens.
pub const TEST_SECRET: &str = "test-secret";

/// In-memory application seeded with `jdoe`.
///
/// `jdoe` has password `current`, one ledger entry `p1` and a private,
/// unverified main email `john@example.com` whose secret is `email-secret`.
pub struct TestApp {
    pub state: AppState,
    pub repo: Arc<InMemoryAccountRepository>,
    pub broker: Arc<MemoryTokenBroker>,
    pub notifier: Arc<RecordingNotifier>,
    pub id: AccountId,
}

impl TestApp {
    pub async fn new() -> Self {
        let repo = Arc::new(InMemoryAccountRepository::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let broker = Arc::new(MemoryTokenBroker::new(
            chrono::Duration::minutes(60),
            Hasher::new("pepper"),
            Arc::clone(&clock),
        ));

        let mut agg = AccountAggregate::new(Account::new("jdoe", "current", Utc::now()));
        agg.add_email("john@example.com", None, false, "email-secret".into(), Utc::now())
            .unwrap();
        agg.record_password("p1", Utc::now());
        let id = agg.id();
        repo.insert(agg).await.unwrap();

        let auth = AccessTokenVerifier::new(&Token {
            secret: Some(TEST_SECRET.into()),
            ..Default::default()
        })
        .unwrap();

        let state = AppState::new(
            Arc::new(Configuration::named("accounts-test")),
            Collaborators {
                repo: Arc::clone(&repo) as Arc<dyn AccountRepository>,
                hasher: Arc::new(PlainHasher),
                broker: Arc::clone(&broker) as Arc<dyn TokenBroker>,
                notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
                clock,
            },
            Arc::new(auth),
        );

        Self {
            state,
            repo,
            broker,
            notifier,
            id,
        }
    }

    /// Valid bearer token for `jdoe`.
    pub fn token(&self) -> String {
        sign(TEST_SECRET, &self.id.to_string(), 60)
    }
}
