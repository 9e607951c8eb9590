//! Status and notification bridge.
//!
//! Two narrow outputs of the worker loop:
//! - **StatusBridge**: best-effort status writes to the ticket store
//! - **Notifier**: completion emails rendered from a template set
//!
//! Neither ever fails the loop; errors are logged by the caller.

pub mod mail;
pub mod status;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use mail::{
    Mail, MailTemplate, MailTemplates, MailTransport, Notifier, NotifyError, NullTransport,
    SmtpConfig, SmtpTransport,
};
pub use status::{Lifecycle, StatusBridge};

/// Notification category selected from a job outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Success,
    Error,
    Timeout,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::Success => write!(f, "success"),
            TemplateKind::Error => write!(f, "error"),
            TemplateKind::Timeout => write!(f, "timeout"),
        }
    }
}
