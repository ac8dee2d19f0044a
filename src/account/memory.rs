//! In-memory account repository, used without PostgreSQL and in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::account::error::{AccountError, Result};
use crate::account::{
    AccountAggregate, AccountId, AccountRepository, ContactKind, UnitOfWork,
};

type Slot = Arc<Mutex<AccountAggregate>>;
type ContactIndex = Arc<RwLock<HashMap<(ContactKind, String), AccountId>>>;

/// In-memory implementation of [`AccountRepository`].
///
/// Each account sits behind its own mutex, held by at most one
/// [`UnitOfWork`] at a time.
#[derive(Debug, Default)]
pub struct InMemoryAccountRepository {
    accounts: Arc<RwLock<HashMap<AccountId, Slot>>>,
    /// Index for nickname -> account ID lookup.
    nicknames: Arc<RwLock<HashMap<String, AccountId>>>,
    /// Index for (kind, value) -> owner lookup.
    contacts: ContactIndex,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, id: AccountId) -> Option<Slot> {
        self.accounts.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find(&self, id: AccountId) -> Result<Option<AccountAggregate>> {
        match self.slot(id).await {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn find_by_nickname(&self, nickname: &str) -> Result<Option<AccountAggregate>> {
        let id = self.nicknames.read().await.get(nickname).copied();
        match id {
            Some(id) => self.find(id).await,
            None => Ok(None),
        }
    }

    async fn find_id_by_email(&self, email: &str) -> Result<Option<AccountId>> {
        let key = (ContactKind::Email, ContactKind::Email.normalize(email));
        Ok(self.contacts.read().await.get(&key).copied())
    }

    async fn begin(&self, id: AccountId) -> Result<Box<dyn UnitOfWork>> {
        let slot = self.slot(id).await.ok_or(AccountError::NotFound)?;
        let guard = slot.lock_owned().await;
        let working = guard.clone();

        tracing::trace!(account_id = %id, "in-memory unit of work opened");

        Ok(Box::new(MemoryUnitOfWork {
            guard,
            working,
            contacts: Arc::clone(&self.contacts),
        }))
    }

    async fn insert(&self, mut aggregate: AccountAggregate) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let mut nicknames = self.nicknames.write().await;
        let mut contacts = self.contacts.write().await;

        let id = aggregate.id();
        let nickname = aggregate.account().nickname.clone();
        if accounts.contains_key(&id) || nicknames.contains_key(&nickname) {
            return Err(AccountError::Internal(
                format!("account '{nickname}' already exists").into(),
            ));
        }
        if aggregate
            .contacts()
            .iter()
            .any(|c| contacts.contains_key(&(c.kind, c.value.clone())))
        {
            return Err(AccountError::ContactTaken);
        }

        for contact in aggregate.contacts() {
            contacts.insert((contact.kind, contact.value.clone()), id);
        }
        aggregate.mark_persisted();
        nicknames.insert(nickname, id);
        accounts.insert(id, Arc::new(Mutex::new(aggregate)));

        Ok(())
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<AccountAggregate>,
    working: AccountAggregate,
    contacts: ContactIndex,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn aggregate(&mut self) -> &mut AccountAggregate {
        &mut self.working
    }

    async fn commit(self: Box<Self>) -> Result<AccountAggregate> {
        let Self {
            mut guard,
            mut working,
            contacts,
        } = *self;
        let id = working.id();

        let mut index = contacts.write().await;
        let taken = working.contacts().iter().any(|c| {
            index
                .get(&(c.kind, c.value.clone()))
                .is_some_and(|owner| *owner != id)
        });
        if taken {
            return Err(AccountError::ContactTaken);
        }

        index.retain(|_, owner| *owner != id);
        for contact in working.contacts() {
            index.insert((contact.kind, contact.value.clone()), id);
        }
        drop(index);

        working.mark_persisted();
        *guard = working.clone();

        tracing::trace!(account_id = %id, "in-memory unit of work committed");

        Ok(working)
    }
}
