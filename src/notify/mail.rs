//! Completion emails.
//!
//! [`Notifier`] renders one of three templates for a finished job and hands
//! the message to a [`MailTransport`]. Without a configured mailer the
//! [`NullTransport`] accepts and drops every message.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{debug, info};

use super::TemplateKind;
use crate::scheduler::JobId;

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Errors that can occur while building or sending a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to render {kind} template: {message}")]
    Template { kind: TemplateKind, message: String },

    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// A fully rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivers rendered messages.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<(), NotifyError>;
}

/// Transport that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

#[async_trait]
impl MailTransport for NullTransport {
    async fn send(&self, mail: &Mail) -> Result<(), NotifyError> {
        debug!(to = %mail.to, subject = %mail.subject, "Mail transport disabled, dropping message");
        Ok(())
    }
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

/// SMTP relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

/// SMTP transport backed by lettre's async STARTTLS relay.
pub struct SmtpTransport {
    mailer: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, Tokio1Executor};

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?.port(config.port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, mail: &Mail) -> Result<(), NotifyError> {
        use lettre::message::header::ContentType;
        use lettre::{AsyncTransport, Message};

        let message = Message::builder()
            .from(mail.from.parse()?)
            .to(mail.to.parse()?)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        self.mailer.send(message).await?;
        info!(to = %mail.to, "Notification email sent");
        Ok(())
    }
}

/// Subject and body templates for one outcome category.
///
/// Both strings are tera templates; `{{ job_id }}` is the only variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailTemplate {
    pub subject: String,
    pub body: String,
}

impl MailTemplate {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Template set keyed by outcome category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailTemplates {
    pub success: MailTemplate,
    pub error: MailTemplate,
    pub timeout: MailTemplate,
}

impl Default for MailTemplates {
    fn default() -> Self {
        Self {
            success: MailTemplate::new(
                "Job {{ job_id }} finished",
                "Your job {{ job_id }} completed successfully.",
            ),
            error: MailTemplate::new(
                "Job {{ job_id }} failed",
                "Your job {{ job_id }} failed.",
            ),
            timeout: MailTemplate::new(
                "Job {{ job_id }} timed out",
                "Your job {{ job_id }} exceeded its time limit and was stopped.",
            ),
        }
    }
}

impl MailTemplates {
    pub fn get(&self, kind: TemplateKind) -> &MailTemplate {
        match kind {
            TemplateKind::Success => &self.success,
            TemplateKind::Error => &self.error,
            TemplateKind::Timeout => &self.timeout,
        }
    }
}

/// Renders and sends completion emails.
#[derive(Clone)]
pub struct Notifier {
    sender: String,
    templates: MailTemplates,
    transport: Arc<dyn MailTransport>,
}

impl Notifier {
    pub fn new(
        sender: impl Into<String>,
        templates: MailTemplates,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            sender: sender.into(),
            templates,
            transport,
        }
    }

    /// A notifier backed by [`NullTransport`].
    pub fn disabled() -> Self {
        Self::new(String::new(), MailTemplates::default(), Arc::new(NullTransport))
    }

    /// Renders the message for `kind` addressed to `to`.
    pub fn render(&self, id: &JobId, to: &str, kind: TemplateKind) -> Result<Mail, NotifyError> {
        let template = self.templates.get(kind);
        let mut context = Context::new();
        context.insert("job_id", id.as_str());

        let render = |source: &str| {
            Tera::one_off(source, &context, false).map_err(|e| NotifyError::Template {
                kind,
                message: e.to_string(),
            })
        };

        Ok(Mail {
            from: self.sender.clone(),
            to: to.to_string(),
            subject: render(&template.subject)?,
            body: render(&template.body)?,
        })
    }

    /// Renders and sends the message for `kind`.
    pub async fn notify(&self, id: &JobId, to: &str, kind: TemplateKind) -> Result<(), NotifyError> {
        let mail = self.render(id, to, kind)?;
        self.transport.send(&mail).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Mail>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, mail: &Mail) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    #[test]
    fn test_render_substitutes_job_id() {
        let notifier = Notifier::new(
            "noreply@example.org",
            MailTemplates::default(),
            Arc::new(NullTransport),
        );
        let mail = notifier
            .render(&JobId::new("abc123"), "user@example.org", TemplateKind::Timeout)
            .unwrap();

        assert_eq!(mail.from, "noreply@example.org");
        assert_eq!(mail.to, "user@example.org");
        assert_eq!(mail.subject, "Job abc123 timed out");
        assert!(mail.body.contains("abc123"));
    }

    #[test]
    fn test_render_reports_broken_template() {
        let mut templates = MailTemplates::default();
        templates.error = MailTemplate::new("{{ job_id", "body");
        let notifier = Notifier::new("a@b.c", templates, Arc::new(NullTransport));

        let err = notifier
            .render(&JobId::new("x"), "u@e.org", TemplateKind::Error)
            .unwrap_err();
        assert!(matches!(err, NotifyError::Template { kind: TemplateKind::Error, .. }));
    }

    #[tokio::test]
    async fn test_notify_uses_selected_template() {
        let transport = Arc::new(RecordingTransport::default());
        let mut templates = MailTemplates::default();
        templates.success = MailTemplate::new("done {{ job_id }}", "ok");
        let notifier = Notifier::new("a@b.c", templates, transport.clone());

        notifier
            .notify(&JobId::new("j1"), "u@e.org", TemplateKind::Success)
            .await
            .unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "done j1");
    }

    #[test]
    fn test_templates_deserialize_partially() {
        let yaml = "success:\n  subject: \"ok {{ job_id }}\"\n  body: \"b\"\n";
        let templates: MailTemplates = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(templates.success.subject, "ok {{ job_id }}");
        assert_eq!(templates.timeout, MailTemplates::default().timeout);
    }
}
