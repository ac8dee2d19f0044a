//! Publish notification events to the mailing queue.

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::account::error::{AccountError, Result, ToInternal};
use crate::account::{AccountId, ContactKind, ContactMethod};
use crate::config::Mail;
use crate::ports::Notifier;

const DEFAULT_AMPQ_HOST: &str = "localhost";
const DEFAULT_AMPQ_PORT: u16 = 5672;
const DEFAULT_AMPQ_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const ID_LENGTH: usize = 12;

/// Mailing templates list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    /// Link confirming a new email.
    EmailVerification,
    /// Code confirming a new phone, sent by SMS.
    PhoneVerification,
    /// Link to choose a new password.
    PasswordResetLink,
    /// The password was just reset.
    PasswordReset,
}

#[derive(Debug, Serialize)]
struct Cloudevent<'a> {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    locale: Option<Cow<'a, str>>,
    to: Cow<'a, str>,
    template: Template,
    #[serde(skip_serializing_if = "Option::is_none")]
    account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<Cow<'a, str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<String>,
}

/// Mailing queue publisher.
///
/// Without a connection, events are only logged.
#[derive(Debug, Clone, Default)]
pub struct MailManager {
    queue: String,
    locale: Option<String>,
    reset_link: Option<String>,
    conn: Option<Arc<Connection>>,
}

impl MailManager {
    /// Create a new [`MailManager`].
    pub async fn new(config: &Mail) -> Result<Self> {
        let addr = Url::parse(&config.address).catch()?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme())
                .map_err(|err| AccountError::Internal(err.into()))?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMPQ_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMPQ_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMPQ_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let conn_config = ConnectionProperties::default()
            .with_connection_name("accounts_mail_client".into());
        let conn = Connection::connect_uri(uri, conn_config).await.catch()?;

        tracing::info!(%addr, queue = config.queue, "rabbitmq connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
            ..Default::default()
        })
    }

    /// Locale attached to every event.
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Page receiving reset tokens.
    pub fn reset_link(mut self, link: Option<String>) -> Self {
        self.reset_link = link;
        self
    }

    async fn create_channel(
        conn: Arc<Connection>,
        queue: &str,
    ) -> Result<Channel> {
        let channel = conn.create_channel().await.catch()?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .catch()?;
        Ok(channel)
    }

    fn create_event(data: Content) -> Cloudevent {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: "com.accounts.notification",
            source: "com.accounts",
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }

    fn content<'a>(&'a self, template: Template, to: &'a str) -> Content<'a> {
        Content {
            locale: self.locale.as_deref().map(Cow::from),
            to: Cow::from(to),
            template,
            account: None,
            secret: None,
            link: None,
        }
    }

    async fn publish(&self, content: Content<'_>) -> Result<()> {
        let template = content.template;
        let Some(conn) = &self.conn else {
            tracing::debug!(?template, "no mail queue, event dropped");
            return Ok(());
        };
        let channel =
            Self::create_channel(Arc::clone(conn), &self.queue).await?;

        let payload = Self::create_event(content);
        let payload = serde_json::to_string(&payload).catch()?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await
            .catch()?;

        tracing::trace!(?template, "event sent");

        Ok(())
    }

    fn link(&self, token: &str, email: &str) -> Option<String> {
        let mut url = Url::parse(self.reset_link.as_deref()?).ok()?;
        url.query_pairs_mut()
            .append_pair("token", token)
            .append_pair("email", email);
        Some(url.to_string())
    }
}

#[async_trait]
impl Notifier for MailManager {
    async fn send_verification(&self, contact: &ContactMethod, secret: &str) -> Result<()> {
        let template = match contact.kind {
            ContactKind::Email => Template::EmailVerification,
            ContactKind::Phone => Template::PhoneVerification,
        };
        let mut content = self.content(template, &contact.value);
        content.account = Some(contact.owner_id.to_string());
        content.secret = Some(Cow::from(secret));

        self.publish(content).await
    }

    async fn send_password_reset_link(&self, email: &str, token: &str) -> Result<()> {
        let mut content = self.content(Template::PasswordResetLink, email);
        content.link = self.link(token, email);
        content.secret = Some(Cow::from(token));

        self.publish(content).await
    }

    async fn notify_password_reset(&self, account: AccountId, email: &str) -> Result<()> {
        let mut content = self.content(Template::PasswordReset, email);
        content.account = Some(account.to_string());

        self.publish(content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_link() {
        let mail = MailManager::default().reset_link(Some("https://example.com/reset".into()));

        assert_eq!(
            mail.link("abc", "a+b@example.com").as_deref(),
            Some("https://example.com/reset?token=abc&email=a%2Bb%40example.com")
        );
        assert_eq!(MailManager::default().link("abc", "a@example.com"), None);
    }

    #[test]
    fn test_event_shape() {
        let mail = MailManager::default().locale("fr");
        let mut content = mail.content(Template::PasswordReset, "a@example.com");
        content.account = Some("id".into());

        let event = serde_json::to_value(MailManager::create_event(content)).unwrap();
        assert_eq!(event["specversion"], "1.0");
        assert_eq!(event["data"]["template"], "password_reset");
        assert_eq!(event["data"]["locale"], "fr");
        assert!(event["data"].get("secret").is_none());
    }

    #[tokio::test]
    async fn test_without_queue_is_noop() {
        MailManager::default()
            .notify_password_reset(AccountId::new(), "a@example.com")
            .await
            .unwrap();
    }
}
