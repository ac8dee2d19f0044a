//! Password change and recovery.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::account::{AccountId, PasswordHistoryEntry};
use crate::profile::PasswordChange;
use crate::reset::ResetRequest;
use crate::router::Valid;
use crate::view::AccountView;
use crate::{AppState, ServerError};

/// Unauthenticated routes under `/password`.
pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /password/forgot` goes to `forgot`.
        .route("/forgot", post(forgot))
        // `POST /password/reset` goes to `reset`.
        .route("/reset", post(reset))
}

#[derive(Debug, Validate, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DirectBody {
    #[validate(length(min = 1, message = "Password must not be empty."))]
    password: String,
}

#[derive(Debug, Validate, Deserialize, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ChangeBody {
    current_password: String,
    #[validate(length(min = 1, message = "Password must not be empty."))]
    new_password: String,
}

/// Shape of the body selects the operation. Mixed shapes match neither.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PasswordBody {
    Change(ChangeBody),
    Direct(DirectBody),
}

impl Validate for PasswordBody {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            PasswordBody::Change(body) => body.validate(),
            PasswordBody::Direct(body) => body.validate(),
        }
    }
}

impl From<PasswordBody> for PasswordChange {
    fn from(body: PasswordBody) -> Self {
        match body {
            PasswordBody::Change(body) => PasswordChange::Change {
                current: body.current_password,
                new: body.new_password,
            },
            PasswordBody::Direct(body) => PasswordChange::Direct {
                password: body.password,
            },
        }
    }
}

/// `POST /profile/password`.
pub async fn change(
    State(state): State<AppState>,
    Extension(id): Extension<AccountId>,
    Valid(body): Valid<PasswordBody>,
) -> Result<Json<AccountView>, ServerError> {
    Ok(Json(state.profile.set_password(id, body.into()).await?))
}

/// `GET /profile/password-history`.
pub async fn history(
    State(state): State<AppState>,
    Extension(id): Extension<AccountId>,
) -> Result<Json<Vec<PasswordHistoryEntry>>, ServerError> {
    Ok(Json(state.profile.password_history(id).await?))
}

#[derive(Debug, Validate, Deserialize, Serialize)]
pub struct ForgotBody {
    #[validate(email(message = "Email must be formated."))]
    email: String,
}

/// `POST /password/forgot`.
pub async fn forgot(
    State(state): State<AppState>,
    Valid(body): Valid<ForgotBody>,
) -> Result<StatusCode, ServerError> {
    state.reset.request(&body.email).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Validate, Deserialize, Serialize)]
pub struct ResetBody {
    #[validate(email(message = "Email must be formated."))]
    email: String,
    password: String,
    #[validate(length(min = 1, message = "Token must not be empty."))]
    token: String,
}

/// `POST /password/reset`.
pub async fn reset(
    State(state): State<AppState>,
    Valid(body): Valid<ResetBody>,
) -> Result<StatusCode, ServerError> {
    let request = ResetRequest {
        email: body.email,
        password: body.password,
        token: body.token,
    };
    state.reset.reset(&request).await?;

    Ok(StatusCode::NO_CONTENT)
}
