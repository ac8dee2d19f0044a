//! Public profiles.

use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};

use crate::view::AccountView;
use crate::{AppState, ServerError};

/// `GET /users/{nickname}`. Private contacts are left out.
pub async fn handler(
    State(state): State<AppState>,
    nickname: Result<Path<String>, PathRejection>,
) -> Result<Json<AccountView>, ServerError> {
    let Path(nickname) = nickname?;
    Ok(Json(state.profile.get_by_nickname(&nickname).await?))
}
