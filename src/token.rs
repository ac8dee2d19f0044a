//! Password reset token brokers.
//!
//! Only a peppered digest of each token is kept; one live token per account.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::account::AccountId;
use crate::account::error::{Result, ToInternal};
use crate::crypto::{Hasher, random_token};
use crate::ports::{Clock, TokenBroker};

const TOKEN_BYTES: usize = 32;

/// PostgreSQL token broker, backed by `password_resets`.
pub struct PgTokenBroker {
    pool: PgPool,
    ttl: Duration,
    hasher: Hasher,
    clock: Arc<dyn Clock>,
}

impl PgTokenBroker {
    /// Create a new [`PgTokenBroker`].
    pub fn new(pool: PgPool, ttl: Duration, hasher: Hasher, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            ttl,
            hasher,
            clock,
        }
    }
}

#[async_trait]
impl TokenBroker for PgTokenBroker {
    async fn issue(&self, account: AccountId, email: &str) -> Result<String> {
        let token = random_token(TOKEN_BYTES);
        let now = self.clock.now();

        sqlx::query(
            r#"
            INSERT INTO password_resets (account_id, email, token_hash, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id) DO UPDATE
            SET
                email = EXCLUDED.email,
                token_hash = EXCLUDED.token_hash,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(*account.as_uuid())
        .bind(email)
        .bind(self.hasher.digest(&token))
        .bind(now)
        .bind(now + self.ttl)
        .execute(&self.pool)
        .await
        .catch()?;

        Ok(token)
    }

    async fn validate(&self, account: AccountId, token: &str) -> Result<bool> {
        let row: Option<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT token_hash, expires_at FROM password_resets WHERE account_id = $1",
        )
        .bind(*account.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .catch()?;

        Ok(row.is_some_and(|(hash, expires_at)| {
            hash == self.hasher.digest(token) && expires_at > self.clock.now()
        }))
    }

    async fn invalidate(&self, account: AccountId, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM password_resets WHERE account_id = $1 AND token_hash = $2")
            .bind(*account.as_uuid())
            .bind(self.hasher.digest(token))
            .execute(&self.pool)
            .await
            .catch()?;

        Ok(())
    }

    async fn consume(&self, account: AccountId, token: &str) -> Result<bool> {
        let consumed: Option<Uuid> = sqlx::query_scalar(
            r#"
            DELETE FROM password_resets
            WHERE account_id = $1 AND token_hash = $2 AND expires_at > $3
            RETURNING account_id
            "#,
        )
        .bind(*account.as_uuid())
        .bind(self.hasher.digest(token))
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await
        .catch()?;

        Ok(consumed.is_some())
    }
}

#[derive(Debug, Clone)]
struct Issued {
    token_hash: String,
    expires_at: DateTime<Utc>,
}

/// In-memory token broker, used without PostgreSQL and in tests.
pub struct MemoryTokenBroker {
    issued: RwLock<HashMap<AccountId, Issued>>,
    ttl: Duration,
    hasher: Hasher,
    clock: Arc<dyn Clock>,
}

impl MemoryTokenBroker {
    /// Create a new [`MemoryTokenBroker`].
    pub fn new(ttl: Duration, hasher: Hasher, clock: Arc<dyn Clock>) -> Self {
        Self {
            issued: RwLock::new(HashMap::new()),
            ttl,
            hasher,
            clock,
        }
    }
}

#[async_trait]
impl TokenBroker for MemoryTokenBroker {
    async fn issue(&self, account: AccountId, _email: &str) -> Result<String> {
        let token = random_token(TOKEN_BYTES);
        let issued = Issued {
            token_hash: self.hasher.digest(&token),
            expires_at: self.clock.now() + self.ttl,
        };

        self.issued.write().await.insert(account, issued);
        Ok(token)
    }

    async fn validate(&self, account: AccountId, token: &str) -> Result<bool> {
        let issued = self.issued.read().await;
        Ok(issued.get(&account).is_some_and(|i| {
            i.token_hash == self.hasher.digest(token) && i.expires_at > self.clock.now()
        }))
    }

    async fn invalidate(&self, account: AccountId, token: &str) -> Result<()> {
        let digest = self.hasher.digest(token);
        let mut issued = self.issued.write().await;
        if issued.get(&account).is_some_and(|i| i.token_hash == digest) {
            issued.remove(&account);
        }
        Ok(())
    }

    async fn consume(&self, account: AccountId, token: &str) -> Result<bool> {
        let digest = self.hasher.digest(token);
        let now = self.clock.now();
        let mut issued = self.issued.write().await;

        let live = issued
            .get(&account)
            .is_some_and(|i| i.token_hash == digest && i.expires_at > now);
        if live {
            issued.remove(&account);
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;

    fn broker() -> (MemoryTokenBroker, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::at("2025-01-01T12:00:00Z"));
        let broker = MemoryTokenBroker::new(
            Duration::minutes(60),
            Hasher::new("pepper"),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (broker, clock)
    }

    #[tokio::test]
    async fn test_issue_validate_invalidate() {
        let (broker, _) = broker();
        let account = AccountId::new();

        let token = broker.issue(account, "a@example.com").await.unwrap();
        assert!(broker.validate(account, &token).await.unwrap());
        assert!(!broker.validate(account, "wrong").await.unwrap());
        assert!(!broker.validate(AccountId::new(), &token).await.unwrap());

        broker.invalidate(account, &token).await.unwrap();
        assert!(!broker.validate(account, &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_consume_once() {
        let (broker, _) = broker();
        let account = AccountId::new();
        let token = broker.issue(account, "a@example.com").await.unwrap();

        assert!(!broker.consume(account, "wrong").await.unwrap());
        assert!(broker.validate(account, &token).await.unwrap());

        assert!(broker.consume(account, &token).await.unwrap());
        assert!(!broker.consume(account, &token).await.unwrap());
        assert!(!broker.validate(account, &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_token_is_not_consumed() {
        let (broker, clock) = broker();
        let account = AccountId::new();
        let token = broker.issue(account, "a@example.com").await.unwrap();

        clock.advance(Duration::minutes(61));
        assert!(!broker.consume(account, &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_token_expires() {
        let (broker, clock) = broker();
        let account = AccountId::new();
        let token = broker.issue(account, "a@example.com").await.unwrap();

        clock.advance(Duration::minutes(59));
        assert!(broker.validate(account, &token).await.unwrap());
        clock.advance(Duration::minutes(1));
        assert!(!broker.validate(account, &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_new_token_replaces_previous() {
        let (broker, _) = broker();
        let account = AccountId::new();
        let first = broker.issue(account, "a@example.com").await.unwrap();
        let second = broker.issue(account, "a@example.com").await.unwrap();

        assert!(!broker.validate(account, &first).await.unwrap());
        assert!(broker.validate(account, &second).await.unwrap());

        // A stale token cannot consume the live one.
        broker.invalidate(account, &first).await.unwrap();
        assert!(broker.validate(account, &second).await.unwrap());
    }
}
