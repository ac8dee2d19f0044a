//! Token-based password recovery.
//!
//! A request goes through `Requested -> Validating -> Reset`, or stops at
//! `Rejected` on the first failing check. Nothing touches the ledger and
//! the caller is never logged in.

use std::sync::Arc;

use crate::account::error::{AccountError, Result};
use crate::account::{AccountId, AccountRepository, CanResetPassword};
use crate::ports::{Clock, Notifier, PasswordHasher, PasswordPolicy, TokenBroker};

/// Credentials sent with a reset.
#[derive(Clone, PartialEq, Eq)]
pub struct ResetRequest {
    pub email: String,
    pub password: String,
    pub token: String,
}

impl std::fmt::Debug for ResetRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetRequest")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Password reset flow.
#[derive(Clone)]
pub struct PasswordResetFlow {
    repo: Arc<dyn AccountRepository>,
    hasher: Arc<dyn PasswordHasher>,
    broker: Arc<dyn TokenBroker>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<dyn PasswordPolicy>,
    clock: Arc<dyn Clock>,
}

impl PasswordResetFlow {
    /// Create a new [`PasswordResetFlow`].
    pub fn new(
        repo: Arc<dyn AccountRepository>,
        hasher: Arc<dyn PasswordHasher>,
        broker: Arc<dyn TokenBroker>,
        notifier: Arc<dyn Notifier>,
        policy: Arc<dyn PasswordPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            hasher,
            broker,
            notifier,
            policy,
            clock,
        }
    }

    async fn resolve(&self, email: &str) -> Result<AccountId> {
        self.repo
            .find_id_by_email(email)
            .await?
            .ok_or(AccountError::UnknownUser)
    }

    /// Issue a token for the owner of `email` and send it there.
    pub async fn request(&self, email: &str) -> Result<()> {
        let account = self.resolve(email).await?;
        let token = self.broker.issue(account, email).await?;

        if let Err(err) = self.notifier.send_password_reset_link(email, &token).await {
            tracing::warn!(error = %err, account_id = %account, "reset link not sent");
        }

        tracing::info!(account_id = %account, "password reset requested");
        Ok(())
    }

    /// Check `request` and overwrite the password.
    ///
    /// Checks run in order: owner of the email (`UnknownUser`), password
    /// policy (`InvalidPassword`), then token (`InvalidToken`).
    pub async fn reset(&self, request: &ResetRequest) -> Result<AccountId> {
        let account = self.resolve(&request.email).await?;

        if !self.policy.accepts(&request.password) {
            tracing::debug!(account_id = %account, "reset rejected by password policy");
            return Err(AccountError::InvalidPassword);
        }

        let hash = self.hasher.hash(&request.password)?;

        let mut uow = self.repo.begin(account).await?;
        let aggregate = uow.aggregate();
        aggregate.set_email_for_password_reset(request.email.clone());
        aggregate.overwrite_password(hash);
        aggregate.touch(self.clock.now());
        let email = aggregate
            .email_for_password_reset()
            .unwrap_or(&request.email)
            .to_owned();

        // Consumed before commit, while the account is still locked.
        if !self.broker.consume(account, &request.token).await? {
            tracing::debug!(account_id = %account, "reset rejected, bad token");
            return Err(AccountError::InvalidToken);
        }
        uow.commit().await?;

        metrics::counter!("password_resets_total").increment(1);
        tracing::info!(account_id = %account, "password reset");

        if let Err(err) = self.notifier.notify_password_reset(account, &email).await {
            tracing::warn!(error = %err, account_id = %account, "reset notification not sent");
        }

        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::account::{Account, AccountAggregate, InMemoryAccountRepository};
    use crate::crypto::Hasher;
    use crate::ports::{AcceptAll, FixedClock, MinLength};
    use crate::testing::{PlainHasher, RecordingNotifier};
    use crate::token::MemoryTokenBroker;

    struct Fixture {
        flow: PasswordResetFlow,
        repo: Arc<InMemoryAccountRepository>,
        broker: Arc<MemoryTokenBroker>,
        notifier: Arc<RecordingNotifier>,
        id: AccountId,
    }

    async fn fixture(policy: Arc<dyn PasswordPolicy>) -> Fixture {
        fixture_with(policy, RecordingNotifier::default()).await
    }

    async fn fixture_with(policy: Arc<dyn PasswordPolicy>, notifier: RecordingNotifier) -> Fixture {
        let repo = Arc::new(InMemoryAccountRepository::new());
        let notifier = Arc::new(notifier);
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::at("2025-01-01T12:00:00Z"));
        let broker = Arc::new(MemoryTokenBroker::new(
            Duration::minutes(60),
            Hasher::new("pepper"),
            Arc::clone(&clock),
        ));

        let mut agg = AccountAggregate::new(Account::new("jdoe", "old", Utc::now()));
        agg.add_email("john@example.com", None, true, "s".into(), Utc::now())
            .unwrap();
        agg.add_email("backup@example.com", None, false, "s".into(), Utc::now())
            .unwrap();
        agg.record_password("old", Utc::now());
        let id = agg.id();
        repo.insert(agg).await.unwrap();

        let flow = PasswordResetFlow::new(
            Arc::clone(&repo) as Arc<dyn AccountRepository>,
            Arc::new(PlainHasher),
            Arc::clone(&broker) as Arc<dyn TokenBroker>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            policy,
            clock,
        );

        Fixture {
            flow,
            repo,
            broker,
            notifier,
            id,
        }
    }

    fn request(email: &str, token: &str) -> ResetRequest {
        ResetRequest {
            email: email.into(),
            password: "brand-new".into(),
            token: token.into(),
        }
    }

    #[tokio::test]
    async fn test_unknown_email() {
        let f = fixture(Arc::new(AcceptAll)).await;

        assert!(matches!(
            f.flow.reset(&request("nobody@example.com", "x")).await,
            Err(AccountError::UnknownUser)
        ));
        assert!(matches!(
            f.flow.request("nobody@example.com").await,
            Err(AccountError::UnknownUser)
        ));
    }

    #[tokio::test]
    async fn test_policy_is_checked_before_token() {
        let f = fixture(Arc::new(MinLength(32))).await;

        assert!(matches!(
            f.flow.reset(&request("john@example.com", "bad-token")).await,
            Err(AccountError::InvalidPassword)
        ));
    }

    #[tokio::test]
    async fn test_reset_with_secondary_email() {
        let f = fixture(Arc::new(AcceptAll)).await;
        let token = f.broker.issue(f.id, "backup@example.com").await.unwrap();

        let id = f.flow.reset(&request("backup@example.com", &token)).await.unwrap();
        assert_eq!(id, f.id);

        let stored = f.repo.find(f.id).await.unwrap().unwrap();
        assert_eq!(stored.account().password_hash(), "brand-new");
        // Reset never writes the ledger.
        assert_eq!(stored.history().len(), 1);

        assert!(!f.broker.validate(f.id, &token).await.unwrap());
        assert_eq!(f.notifier.resets(), vec!["backup@example.com".to_owned()]);

        // Replaying a consumed token.
        assert!(matches!(
            f.flow.reset(&request("backup@example.com", &token)).await,
            Err(AccountError::InvalidToken)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_token_resets_once_under_concurrency() {
        let f = fixture_with(
            Arc::new(AcceptAll),
            RecordingNotifier::slow(std::time::Duration::from_millis(200)),
        )
        .await;
        let token = f.broker.issue(f.id, "john@example.com").await.unwrap();

        let first = {
            let flow = f.flow.clone();
            let mut req = request("john@example.com", &token);
            req.password = "first".into();
            tokio::spawn(async move { flow.reset(&req).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let second = {
            let flow = f.flow.clone();
            let mut req = request("john@example.com", &token);
            req.password = "second".into();
            tokio::spawn(async move { flow.reset(&req).await })
        };

        assert!(first.await.unwrap().is_ok());
        assert!(matches!(second.await.unwrap(), Err(AccountError::InvalidToken)));

        let stored = f.repo.find(f.id).await.unwrap().unwrap();
        assert_eq!(stored.account().password_hash(), "first");
        assert_eq!(f.notifier.resets().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_token_leaves_password() {
        let f = fixture(Arc::new(AcceptAll)).await;
        f.broker.issue(f.id, "john@example.com").await.unwrap();

        assert!(matches!(
            f.flow.reset(&request("john@example.com", "forged")).await,
            Err(AccountError::InvalidToken)
        ));
        let stored = f.repo.find(f.id).await.unwrap().unwrap();
        assert_eq!(stored.account().password_hash(), "old");
    }

    #[tokio::test]
    async fn test_request_sends_link() {
        let f = fixture(Arc::new(AcceptAll)).await;

        f.flow.request("John@Example.com").await.unwrap();

        let links = f.notifier.links();
        assert_eq!(links.len(), 1);
        assert!(f.broker.validate(f.id, &links[0].1).await.unwrap());

        let token = links[0].1.clone();
        f.flow.reset(&request("john@example.com", &token)).await.unwrap();
    }
}
