//! Errors raised by the account core.

use chrono::{DateTime, Utc};

pub type Result<T> = std::result::Result<T, AccountError>;

/// Every failure a caller can react to, plus a catch-all for infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("no account owns this email address")]
    UnknownUser,
    #[error("password does not satisfy the password policy")]
    InvalidPassword,
    #[error("token is invalid or expired")]
    InvalidToken,
    #[error("this password was already used (added at {added_at})")]
    PasswordReuse { added_at: DateTime<Utc> },
    #[error("current password is wrong")]
    WrongCurrentPassword,
    #[error("main contact method cannot be deleted")]
    MainContactProtected,
    #[error("resource not found")]
    NotFound,
    #[error("contact method is already registered")]
    ContactTaken,

    #[error("internal error")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl AccountError {
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(err))
    }
}

/// Map any infrastructure error into [`AccountError::Internal`].
pub trait ToInternal<T> {
    fn catch(self) -> Result<T>;
}

impl<T, E> ToInternal<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn catch(self) -> Result<T> {
        self.map_err(|e| AccountError::Internal(Box::new(e)))
    }
}
