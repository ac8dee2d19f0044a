//! PostgreSQL implementation for account repository.

mod models;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::account::error::{AccountError, Result, ToInternal};
use crate::account::{
    Account, AccountAggregate, AccountId, AccountRepository, ContactKind,
    ContactMethod, PasswordHistoryEntry, UnitOfWork,
};
use models::{ACCOUNT_COLUMNS, AccountRecord, ContactRecord, HistoryRecord};

/// PostgreSQL account repository.
#[derive(Debug, Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    /// Create a new [`PgAccountRepository`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Unique violations can only come from `(kind, value)` on contacts.
fn conflict(err: sqlx::Error) -> AccountError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AccountError::ContactTaken,
        _ => AccountError::internal(err),
    }
}

async fn load(
    conn: &mut PgConnection,
    id: AccountId,
    for_update: bool,
) -> Result<Option<AccountAggregate>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1{lock}");

    let Some(record) = sqlx::query_as::<_, AccountRecord>(&sql)
        .bind(*id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .catch()?
    else {
        return Ok(None);
    };

    let contacts = sqlx::query_as::<_, ContactRecord>(
        r#"
        SELECT
            id, owner_id, kind, value, label, public, verified,
            verification_secret, created_at
        FROM contact_methods
        WHERE owner_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(*id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .catch()?
    .into_iter()
    .map(ContactRecord::try_into_contact)
    .collect::<Result<Vec<_>>>()?;

    let history = sqlx::query_as::<_, HistoryRecord>(
        r#"
        SELECT id, owner_id, password_hash, created_at
        FROM password_history
        WHERE owner_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(*id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .catch()?
    .into_iter()
    .map(PasswordHistoryEntry::from)
    .collect();

    let identities: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM external_identities WHERE account_id = $1",
    )
    .bind(*id.as_uuid())
    .fetch_one(&mut *conn)
    .await
    .catch()?;

    Ok(Some(AccountAggregate::from_parts(
        Account::from(record),
        contacts,
        history,
        u32::try_from(identities).unwrap_or(u32::MAX),
    )))
}

async fn insert_account(conn: &mut PgConnection, account: &Account) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO accounts (
            id, nickname, password_hash, first_name, last_name, gender,
            birthday, country, timezone, avatar, main_email_id, main_phone_id,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(*account.id.as_uuid())
    .bind(&account.nickname)
    .bind(account.password_hash())
    .bind(&account.first_name)
    .bind(&account.last_name)
    .bind(account.gender.as_str())
    .bind(account.birthday)
    .bind(&account.country)
    .bind(&account.timezone)
    .bind(account.avatar.as_ref().map(Json))
    .bind(account.main_email_id.map(|id| *id.as_uuid()))
    .bind(account.main_phone_id.map(|id| *id.as_uuid()))
    .bind(account.created_at)
    .bind(account.updated_at)
    .execute(&mut *conn)
    .await
    .catch()?;

    Ok(())
}

async fn update_account(conn: &mut PgConnection, account: &Account) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE accounts
        SET
            password_hash = $2,
            first_name = $3,
            last_name = $4,
            gender = $5,
            birthday = $6,
            country = $7,
            timezone = $8,
            avatar = $9,
            main_email_id = $10,
            main_phone_id = $11,
            updated_at = $12
        WHERE id = $1
        "#,
    )
    .bind(*account.id.as_uuid())
    .bind(account.password_hash())
    .bind(&account.first_name)
    .bind(&account.last_name)
    .bind(account.gender.as_str())
    .bind(account.birthday)
    .bind(&account.country)
    .bind(&account.timezone)
    .bind(account.avatar.as_ref().map(Json))
    .bind(account.main_email_id.map(|id| *id.as_uuid()))
    .bind(account.main_phone_id.map(|id| *id.as_uuid()))
    .bind(account.updated_at)
    .execute(&mut *conn)
    .await
    .catch()?;

    Ok(())
}

async fn upsert_contact(conn: &mut PgConnection, contact: &ContactMethod) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO contact_methods (
            id, owner_id, kind, value, label, public, verified,
            verification_secret, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE
        SET
            label = EXCLUDED.label,
            public = EXCLUDED.public,
            verified = EXCLUDED.verified,
            verification_secret = EXCLUDED.verification_secret
        "#,
    )
    .bind(*contact.id.as_uuid())
    .bind(*contact.owner_id.as_uuid())
    .bind(contact.kind.as_str())
    .bind(&contact.value)
    .bind(&contact.label)
    .bind(contact.public)
    .bind(contact.verified)
    .bind(contact.verification_secret())
    .bind(contact.created_at)
    .execute(&mut *conn)
    .await
    .map_err(conflict)?;

    Ok(())
}

async fn insert_history(conn: &mut PgConnection, entry: &PasswordHistoryEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO password_history (id, owner_id, password_hash, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(entry.id)
    .bind(*entry.owner_id.as_uuid())
    .bind(entry.password_hash())
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await
    .catch()?;

    Ok(())
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn find(&self, id: AccountId) -> Result<Option<AccountAggregate>> {
        let mut conn = self.pool.acquire().await.catch()?;
        load(&mut *conn, id, false).await
    }

    async fn find_by_nickname(&self, nickname: &str) -> Result<Option<AccountAggregate>> {
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM accounts WHERE nickname = $1")
                .bind(nickname)
                .fetch_optional(&self.pool)
                .await
                .catch()?;

        match id {
            Some(id) => self.find(AccountId::from(id)).await,
            None => Ok(None),
        }
    }

    async fn find_id_by_email(&self, email: &str) -> Result<Option<AccountId>> {
        let owner: Option<Uuid> = sqlx::query_scalar(
            "SELECT owner_id FROM contact_methods WHERE kind = $1 AND value = $2",
        )
        .bind(ContactKind::Email.as_str())
        .bind(ContactKind::Email.normalize(email))
        .fetch_optional(&self.pool)
        .await
        .catch()?;

        Ok(owner.map(AccountId::from))
    }

    async fn begin(&self, id: AccountId) -> Result<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await.catch()?;
        let aggregate = load(&mut *tx, id, true)
            .await?
            .ok_or(AccountError::NotFound)?;

        Ok(Box::new(PgUnitOfWork { tx, aggregate }))
    }

    async fn insert(&self, mut aggregate: AccountAggregate) -> Result<()> {
        let mut tx = self.pool.begin().await.catch()?;

        insert_account(&mut *tx, aggregate.account()).await?;
        for contact in aggregate.contacts() {
            upsert_contact(&mut *tx, contact).await?;
        }
        for entry in aggregate.history() {
            insert_history(&mut *tx, entry).await?;
        }

        tx.commit().await.catch()?;
        aggregate.mark_persisted();

        tracing::debug!(account_id = %aggregate.id(), "account inserted");

        Ok(())
    }
}

/// Transaction holding `FOR UPDATE` on the account row.
struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    aggregate: AccountAggregate,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    fn aggregate(&mut self) -> &mut AccountAggregate {
        &mut self.aggregate
    }

    async fn commit(self: Box<Self>) -> Result<AccountAggregate> {
        let Self {
            mut tx,
            mut aggregate,
        } = *self;
        let id = aggregate.id();

        let removed: Vec<Uuid> = aggregate
            .removed_contacts()
            .iter()
            .map(|id| *id.as_uuid())
            .collect();
        if !removed.is_empty() {
            sqlx::query("DELETE FROM contact_methods WHERE owner_id = $1 AND id = ANY($2)")
                .bind(*id.as_uuid())
                .bind(removed)
                .execute(&mut *tx)
                .await
                .catch()?;
        }

        for contact in aggregate.contacts() {
            upsert_contact(&mut *tx, contact).await?;
        }
        update_account(&mut *tx, aggregate.account()).await?;
        for entry in aggregate.new_history() {
            insert_history(&mut *tx, entry).await?;
        }

        tx.commit().await.catch()?;
        aggregate.mark_persisted();

        tracing::trace!(account_id = %id, "account committed");

        Ok(aggregate)
    }
}
