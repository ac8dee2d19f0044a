//! Persistence ports for accounts.

use async_trait::async_trait;

use crate::account::error::Result;
use crate::account::{AccountAggregate, AccountId};

/// Port for account persistence.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Load an aggregate without locking it.
    async fn find(&self, id: AccountId) -> Result<Option<AccountAggregate>>;

    async fn find_by_nickname(&self, nickname: &str) -> Result<Option<AccountAggregate>>;

    /// Owner of `email`, matched against every owned email.
    async fn find_id_by_email(&self, email: &str) -> Result<Option<AccountId>>;

    /// Open a unit of work holding the account lock.
    ///
    /// Fails with [`AccountError::NotFound`](crate::account::error::AccountError::NotFound)
    /// when the account does not exist.
    async fn begin(&self, id: AccountId) -> Result<Box<dyn UnitOfWork>>;

    /// Store a brand new aggregate. Used for seeding.
    async fn insert(&self, aggregate: AccountAggregate) -> Result<()>;
}

/// Exclusive access to one aggregate.
///
/// Dropping without [`UnitOfWork::commit`] discards every change.
#[async_trait]
pub trait UnitOfWork: Send {
    fn aggregate(&mut self) -> &mut AccountAggregate;

    /// Persist changes, release the lock and hand back the stored aggregate.
    async fn commit(self: Box<Self>) -> Result<AccountAggregate>;
}
