//! Account backend: profiles, owned emails and phones, password lifecycle
//! and recovery.

#![forbid(unsafe_code)]
pub mod account;
mod auth;
pub mod config;
mod crypto;
mod database;
pub mod error;
mod mail;
pub mod ports;
pub mod profile;
pub mod reset;
mod router;
pub mod telemetry;
#[cfg(test)]
mod testing;
mod token;
pub mod view;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware};
pub use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

use crate::account::{AccountRepository, InMemoryAccountRepository, PgAccountRepository};
use crate::auth::AccessTokenVerifier;
use crate::config::{Configuration, Token};
use crate::crypto::{Hasher, PasswordManager, random_token};
use crate::ports::{
    AcceptAll, Clock, MinLength, Notifier, PasswordHasher, PasswordPolicy, SystemClock,
    TokenBroker,
};
use crate::profile::ProfileService;
use crate::reset::PasswordResetFlow;
use crate::token::{MemoryTokenBroker, PgTokenBroker};
use crate::view::ViewProjection;

const CONFIG_PATH: &str = "CONFIG_PATH";
const PEPPER: &str = "SALT";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    token: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// Adapters wired into the use cases.
pub struct Collaborators {
    pub repo: Arc<dyn AccountRepository>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub broker: Arc<dyn TokenBroker>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub profile: Arc<ProfileService>,
    pub reset: Arc<PasswordResetFlow>,
    pub auth: Arc<AccessTokenVerifier>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build use cases on top of `collaborators`.
    pub fn new(
        config: Arc<Configuration>,
        collaborators: Collaborators,
        auth: Arc<AccessTokenVerifier>,
    ) -> Self {
        let Collaborators {
            repo,
            hasher,
            broker,
            notifier,
            clock,
        } = collaborators;

        let policy: Arc<dyn PasswordPolicy> = match config.reset.min_password_length {
            Some(length) => Arc::new(MinLength(length)),
            None => Arc::new(AcceptAll),
        };
        let view = ViewProjection::new(&config.view, Arc::clone(&clock));

        let profile = ProfileService::new(
            Arc::clone(&repo),
            Arc::clone(&hasher),
            Arc::clone(&notifier),
            Arc::clone(&clock),
            view,
        );
        let reset = PasswordResetFlow::new(repo, hasher, broker, notifier, policy, clock);

        Self {
            config,
            profile: Arc::new(profile),
            reset: Arc::new(reset),
            auth,
            metrics: None,
        }
    }

    /// Expose `handle` on `GET /metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, REQUEST_TIMEOUT))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(router::status::metrics))
        .route("/users/{nickname}", get(router::users::handler))
        .nest("/password", router::password::router())
        .nest("/profile", router::profile::router(state.clone()))
        .with_state(state)
        .route_layer(middleware::from_fn(telemetry::track))
        .layer(middleware)
}

fn verifier(config: Option<&Token>) -> Result<AccessTokenVerifier, Box<dyn std::error::Error>> {
    match config {
        Some(token) => Ok(AccessTokenVerifier::new(token)?),
        None => {
            tracing::warn!("missing `token` entry on `config.yaml` file, no access token will be accepted");
            let throwaway = Token {
                secret: Some(random_token(32)),
                ..Default::default()
            };
            Ok(AccessTokenVerifier::new(&throwaway)?)
        },
    }
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let mut config = Configuration::default();
    if let Ok(path) = std::env::var(CONFIG_PATH) {
        config = config.path(path.into());
    }
    let config = config.read()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ttl = chrono::Duration::minutes(i64::from(config.reset.ttl_minutes));
    let pepper = Hasher::new(std::env::var(PEPPER).unwrap_or_default());

    let (repo, broker): (Arc<dyn AccountRepository>, Arc<dyn TokenBroker>) = match &config.postgres {
        Some(postgres) => {
            let db = database::Database::from_config(postgres).await?;
            (
                Arc::new(PgAccountRepository::new(db.postgres.clone())),
                Arc::new(PgTokenBroker::new(db.postgres, ttl, pepper, Arc::clone(&clock))),
            )
        },
        None => {
            tracing::warn!("missing `postgres` entry on `config.yaml` file, accounts are kept in memory");
            (
                Arc::new(InMemoryAccountRepository::new()),
                Arc::new(MemoryTokenBroker::new(ttl, pepper, Arc::clone(&clock))),
            )
        },
    };

    // handle mail sender.
    let mail = match &config.mail {
        Some(cfg) => mail::MailManager::new(cfg).await?,
        None => mail::MailManager::default(),
    }
    .locale(config.view.locale.clone())
    .reset_link(config.reset.link.clone());

    let hasher = PasswordManager::new(config.argon2.clone())?;
    let auth = verifier(config.token.as_ref())?;

    Ok(AppState::new(
        config,
        Collaborators {
            repo,
            hasher: Arc::new(hasher),
            broker,
            notifier: Arc::new(mail),
            clock,
        },
        Arc::new(auth),
    ))
}
