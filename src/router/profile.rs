//! Profile of the authenticated account holder.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router, middleware};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::account::{AccountId, Avatar, ContactKind, Crop};
use crate::auth;
use crate::profile::parse_user_data;
use crate::router::{Valid, contacts, password};
use crate::view::AccountView;
use crate::{AppState, ServerError};

/// Routes under `/profile`. Authorization required.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // `GET /profile` goes to `get`.
        .route("/", get(get_profile).patch(update))
        .route("/avatar", put(avatar))
        .route("/password", post(password::change))
        .route("/password-history", get(password::history))
        .nest("/emails", contacts::router(ContactKind::Email))
        .nest("/phones", contacts::router(ContactKind::Phone))
        .route_layer(middleware::from_fn_with_state(state, auth::authenticate))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(id): Extension<AccountId>,
) -> Result<Json<AccountView>, ServerError> {
    Ok(Json(state.profile.get(id).await?))
}

/// `PATCH /profile`. Unknown keys are ignored.
pub async fn update(
    State(state): State<AppState>,
    Extension(id): Extension<AccountId>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<AccountView>, ServerError> {
    let Json(body) = body?;
    let updates = parse_user_data(&body)?;

    Ok(Json(state.profile.set_user_data(id, updates).await?))
}

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct AvatarBody {
    #[validate(url(message = "Avatar must be an URL."))]
    url: String,
    #[validate(range(min = 1, message = "Width must be positive."))]
    width: u32,
    #[validate(range(min = 1, message = "Height must be positive."))]
    height: u32,
    crop: Option<Crop>,
}

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct AvatarUpdate {
    /// `null` removes the avatar.
    #[validate(nested)]
    avatar: Option<AvatarBody>,
}

/// `PUT /profile/avatar`.
pub async fn avatar(
    State(state): State<AppState>,
    Extension(id): Extension<AccountId>,
    Valid(body): Valid<AvatarUpdate>,
) -> Result<Json<AccountView>, ServerError> {
    let avatar = body.avatar.map(|a| Avatar {
        url: a.url,
        width: a.width,
        height: a.height,
        crop: a.crop,
    });

    Ok(Json(state.profile.set_avatar(id, avatar).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::account::AccountRepository;
    use crate::testing::TestApp;
    use crate::{app, make_request};

    async fn view(response: axum::response::Response) -> AccountView {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token() {
        let test = TestApp::new().await;

        let response = make_request(None, app(test.state), Method::GET, "/profile", String::default()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_forged_token() {
        let test = TestApp::new().await;
        let token = auth::sign("not-the-secret", &test.id.to_string(), 60);

        let response = make_request(Some(&token), app(test.state), Method::GET, "/profile", String::default()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_get_own_profile() {
        let test = TestApp::new().await;

        let response = make_request(Some(&test.token()), app(test.state), Method::GET, "/profile", String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = view(response).await;
        assert_eq!(body.id, test.id);
        assert_eq!(body.emails.len(), 1);
        assert!(!body.activated);
    }

    #[tokio::test]
    async fn test_patch_profile() {
        let test = TestApp::new().await;
        let body = json!({
            "firstName": "John",
            "lastName": "Doe",
            "birthday": "2000-01-01",
            "password": "ignored",
        });

        let response = make_request(
            Some(&test.token()),
            app(test.state),
            Method::PATCH,
            "/profile",
            body.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = view(response).await;
        assert_eq!(body.full_name.as_deref(), Some("John Doe"));
        assert_eq!(body.birthday.as_deref(), Some("2000-01-01"));

        let stored = test.repo.find(test.id).await.unwrap().unwrap();
        assert_eq!(stored.account().password_hash(), "current");
    }

    #[tokio::test]
    async fn test_patch_profile_rejects_bad_gender() {
        let test = TestApp::new().await;

        let response = make_request(
            Some(&test.token()),
            app(test.state),
            Method::PATCH,
            "/profile",
            json!({ "gender": "robot" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_set_and_remove_avatar() {
        let test = TestApp::new().await;
        let body = json!({ "avatar": { "url": "https://cdn.example.com/a.webp", "width": 256, "height": 256 } });

        let response = make_request(
            Some(&test.token()),
            app(test.state.clone()),
            Method::PUT,
            "/profile/avatar",
            body.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(view(response).await.avatar.map(|a| a.width), Some(256));

        let response = make_request(
            Some(&test.token()),
            app(test.state),
            Method::PUT,
            "/profile/avatar",
            json!({ "avatar": null }).to_string(),
        )
        .await;
        assert_eq!(view(response).await.avatar, None);
    }

    #[tokio::test]
    async fn test_avatar_must_be_url() {
        let test = TestApp::new().await;
        let body = json!({ "avatar": { "url": "not a url", "width": 1, "height": 1 } });

        let response = make_request(
            Some(&test.token()),
            app(test.state),
            Method::PUT,
            "/profile/avatar",
            body.to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
