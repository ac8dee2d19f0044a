//! Emails and phones owned by the authenticated account holder.
//!
//! The same router serves `/profile/emails` and `/profile/phones`.

use std::sync::LazyLock;

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Extension, Json, Router};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidateEmail, ValidationError, ValidationErrors};

use crate::account::{AccountId, ContactId, ContactKind};
use crate::profile::NewContact;
use crate::router::Valid;
use crate::view::AccountView;
use crate::{AppState, ServerError};

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[0-9][0-9 ().-]{3,24}$").expect("phone pattern is valid")
});

pub fn router(kind: ContactKind) -> Router<AppState> {
    Router::new()
        .route("/", post(add))
        .route("/{id}", axum::routing::delete(remove).patch(visibility))
        .route("/{id}/main", put(set_main))
        .route("/{id}/verify", post(verify))
        .layer(Extension(kind))
}

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct AddBody {
    #[validate(length(min = 1, max = 255, message = "Value must be 1 to 255 characters long."))]
    value: String,
    #[validate(length(max = 50, message = "Label must be at most 50 characters long."))]
    label: Option<String>,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    main: bool,
}

fn check_value(kind: ContactKind, value: &str) -> Result<(), ValidationErrors> {
    let valid = match kind {
        ContactKind::Email => value.trim().validate_email(),
        ContactKind::Phone => PHONE.is_match(value.trim()),
    };
    if valid {
        return Ok(());
    }

    let mut errors = ValidationErrors::new();
    let error = match kind {
        ContactKind::Email => ValidationError::new("email").with_message("Email must be formated.".into()),
        ContactKind::Phone => ValidationError::new("phone").with_message("Phone number must be formated.".into()),
    };
    errors.add("value", error);
    Err(errors)
}

/// `POST /profile/{emails,phones}`.
pub async fn add(
    State(state): State<AppState>,
    Extension(id): Extension<AccountId>,
    Extension(kind): Extension<ContactKind>,
    Valid(body): Valid<AddBody>,
) -> Result<(StatusCode, Json<AccountView>), ServerError> {
    check_value(kind, &body.value)?;

    let new = NewContact {
        value: body.value,
        label: body.label,
        public: body.public,
        main: body.main,
    };
    let view = match kind {
        ContactKind::Email => state.profile.add_email(id, new).await?,
        ContactKind::Phone => state.profile.add_phone(id, new).await?,
    };

    Ok((StatusCode::CREATED, Json(view)))
}

/// `DELETE /profile/{emails,phones}/{id}`.
pub async fn remove(
    State(state): State<AppState>,
    Extension(id): Extension<AccountId>,
    Extension(kind): Extension<ContactKind>,
    contact: Result<Path<ContactId>, PathRejection>,
) -> Result<Json<AccountView>, ServerError> {
    let Path(contact) = contact?;
    let view = match kind {
        ContactKind::Email => state.profile.remove_email(id, contact).await?,
        ContactKind::Phone => state.profile.remove_phone(id, contact).await?,
    };

    Ok(Json(view))
}

/// `PUT /profile/{emails,phones}/{id}/main`.
pub async fn set_main(
    State(state): State<AppState>,
    Extension(id): Extension<AccountId>,
    Extension(kind): Extension<ContactKind>,
    contact: Result<Path<ContactId>, PathRejection>,
) -> Result<Json<AccountView>, ServerError> {
    let Path(contact) = contact?;
    let view = match kind {
        ContactKind::Email => state.profile.set_main_email(id, contact).await?,
        ContactKind::Phone => state.profile.set_main_phone(id, contact).await?,
    };

    Ok(Json(view))
}

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct VisibilityBody {
    public: bool,
}

/// `PATCH /profile/{emails,phones}/{id}`.
pub async fn visibility(
    State(state): State<AppState>,
    Extension(id): Extension<AccountId>,
    Extension(kind): Extension<ContactKind>,
    contact: Result<Path<ContactId>, PathRejection>,
    Valid(body): Valid<VisibilityBody>,
) -> Result<Json<AccountView>, ServerError> {
    let Path(contact) = contact?;

    Ok(Json(
        state
            .profile
            .set_contact_visibility(id, kind, contact, body.public)
            .await?,
    ))
}

#[derive(Validate, Serialize, Deserialize)]
pub struct VerifyBody {
    #[validate(length(min = 1, message = "Secret must not be empty."))]
    secret: String,
}

/// `POST /profile/{emails,phones}/{id}/verify`.
pub async fn verify(
    State(state): State<AppState>,
    Extension(id): Extension<AccountId>,
    Extension(kind): Extension<ContactKind>,
    contact: Result<Path<ContactId>, PathRejection>,
    Valid(body): Valid<VerifyBody>,
) -> Result<Json<AccountView>, ServerError> {
    let Path(contact) = contact?;

    Ok(Json(
        state
            .profile
            .verify_contact(id, kind, contact, &body.secret)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::account::AccountRepository;
    use crate::testing::TestApp;
    use crate::{app, make_request};

    async fn send(test: &TestApp, method: Method, path: &str, body: serde_json::Value) -> (StatusCode, Option<AccountView>) {
        let response = make_request(
            Some(&test.token()),
            app(test.state.clone()),
            method,
            path,
            body.to_string(),
        )
        .await;
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).ok())
    }

    async fn main_email(test: &TestApp) -> ContactId {
        let stored = test.repo.find(test.id).await.unwrap().unwrap();
        stored.main_email().map(|e| e.id).unwrap()
    }

    #[test]
    fn test_check_value() {
        assert!(check_value(ContactKind::Email, "john@example.com").is_ok());
        assert!(check_value(ContactKind::Email, "john").is_err());
        assert!(check_value(ContactKind::Phone, "+33 6 12 34 56 78").is_ok());
        assert!(check_value(ContactKind::Phone, "call me").is_err());
    }

    #[tokio::test]
    async fn test_add_email() {
        let test = TestApp::new().await;

        let (status, view) = send(
            &test,
            Method::POST,
            "/profile/emails",
            json!({ "value": "Second@Example.com", "label": "work", "public": true }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let view = view.unwrap();
        assert_eq!(view.emails.len(), 2);
        assert!(view.emails.iter().any(|e| e.value == "second@example.com"));
        // A main email already exists.
        assert_eq!(view.main_email.map(|e| e.value).as_deref(), Some("john@example.com"));
        assert_eq!(test.notifier.verifications().len(), 1);
    }

    #[tokio::test]
    async fn test_add_email_taken() {
        let test = TestApp::new().await;

        let (status, _) = send(&test, Method::POST, "/profile/emails", json!({ "value": "john@example.com" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_add_invalid_phone() {
        let test = TestApp::new().await;

        let (status, _) = send(&test, Method::POST, "/profile/phones", json!({ "value": "not a phone" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_main_email() {
        let test = TestApp::new().await;
        let main = main_email(&test).await;

        let (status, _) = send(&test, Method::DELETE, &format!("/profile/emails/{main}"), json!(null)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(main_email(&test).await, main);
    }

    #[tokio::test]
    async fn test_switch_main_then_delete() {
        let test = TestApp::new().await;
        let old = main_email(&test).await;
        let (_, view) = send(&test, Method::POST, "/profile/emails", json!({ "value": "new@example.com" })).await;
        let new = view
            .unwrap()
            .emails
            .into_iter()
            .find(|e| e.value == "new@example.com")
            .map(|e| e.id)
            .unwrap();

        let (status, view) = send(&test, Method::PUT, &format!("/profile/emails/{new}/main"), json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view.unwrap().main_email.map(|e| e.id), Some(new));

        let (status, view) = send(&test, Method::DELETE, &format!("/profile/emails/{old}"), json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view.unwrap().emails.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_main_phone_promotes_another() {
        let test = TestApp::new().await;
        send(&test, Method::POST, "/profile/phones", json!({ "value": "+33600000001" })).await;
        let (_, view) = send(&test, Method::POST, "/profile/phones", json!({ "value": "+33600000002" })).await;
        let main = view.unwrap().main_phone.unwrap();
        assert_eq!(main.value, "+33600000001");

        let (status, view) = send(&test, Method::DELETE, &format!("/profile/phones/{}", main.id), json!(null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view.unwrap().main_phone.map(|p| p.value).as_deref(), Some("+33600000002"));
    }

    #[tokio::test]
    async fn test_unknown_contact() {
        let test = TestApp::new().await;
        let unknown = ContactId::new();

        let (status, _) = send(&test, Method::PUT, &format!("/profile/emails/{unknown}/main"), json!(null)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&test, Method::DELETE, "/profile/emails/not-an-id", json!(null)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_visibility_and_verify() {
        let test = TestApp::new().await;
        let main = main_email(&test).await;

        let (status, view) = send(&test, Method::PATCH, &format!("/profile/emails/{main}"), json!({ "public": true })).await;
        assert_eq!(status, StatusCode::OK);
        assert!(view.unwrap().emails[0].public);

        let (status, _) = send(
            &test,
            Method::POST,
            &format!("/profile/emails/{main}/verify"),
            json!({ "secret": "wrong" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, view) = send(
            &test,
            Method::POST,
            &format!("/profile/emails/{main}/verify"),
            json!({ "secret": "email-secret" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(view.unwrap().activated);
    }
}
