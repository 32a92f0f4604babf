//! Rate-limited alert notifications
//!
//! Each trigger owns one [`Notifier`]. The notifier decides whether an alert
//! may go out (the suppression window), renders the message body and hands it
//! to a [`Mailer`] for delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, Trigger};

pub mod mailer;
pub mod template;

pub use mailer::{HttpMailer, LogMailer, MailMessage, Mailer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The request never reached the delivery service
    #[error("failed to deliver notification: {0}")]
    Delivery(String),

    /// The delivery service answered with a non-success status
    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Notifier: Send {
    /// Notify about a breach, substituting `values` into the message body
    ///
    /// Returns `Ok(())` without delivering anything while suppressed.
    async fn send(&mut self, values: &HashMap<String, String>) -> Result<(), NotifyError>;
}

/// The mailer configured for this process
///
/// Delivers through the notification service when `NOTIFICATION_API` is set,
/// otherwise only logs.
pub fn mailer_for(config: &AppConfig) -> Result<Arc<dyn Mailer>, NotifyError> {
    match &config.notification_api {
        Some(url) => {
            info!("delivering notifications through {url}");
            Ok(Arc::new(HttpMailer::new(
                url.clone(),
                config.notification_secret.clone(),
            )?))
        }
        None => {
            warn!("NOTIFICATION_API not set, notifications are only logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

/// Process-wide labels woven into every notification
#[derive(Debug, Clone, Default)]
pub struct NotifierContext {
    pub service_name: String,
    pub environment: String,
}

impl From<&AppConfig> for NotifierContext {
    fn from(config: &AppConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            environment: config.environment.clone(),
        }
    }
}

/// Notifier delivering through a [`Mailer`] at most once per suppression window
pub struct EmailNotifier {
    mailer: Arc<dyn Mailer>,
    message: MailMessage,
    suppress_interval: Duration,
    last_notify_at: Option<Instant>,
}

impl EmailNotifier {
    pub fn new(mailer: Arc<dyn Mailer>, trigger: &Trigger, context: &NotifierContext) -> Self {
        let mut body = format!(
            "{}\nSLA breached in {}\n",
            context.service_name, context.environment
        );
        if let Some(text) = &trigger.text {
            body.push_str(text);
            body.push('\n');
        }

        Self {
            mailer,
            message: MailMessage {
                subject: trigger.subject.clone(),
                body,
                recipients: trigger.to.clone(),
                ..Default::default()
            },
            suppress_interval: trigger.suppress_interval(),
            last_notify_at: None,
        }
    }

    /// The unrendered message template
    pub fn message(&self) -> &MailMessage {
        &self.message
    }

    fn is_suppressed(&self, now: Instant) -> bool {
        self.last_notify_at
            .is_some_and(|last| now.duration_since(last) < self.suppress_interval)
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&mut self, values: &HashMap<String, String>) -> Result<(), NotifyError> {
        let now = Instant::now();
        if self.is_suppressed(now) {
            debug!("notification suppressed for {}", self.message.subject);
            return Ok(());
        }

        self.last_notify_at = Some(now);
        info!("SLA breached, notifying {} recipients", self.message.recipients.len());

        let body = template::render(&self.message.body, values).unwrap_or_else(|e| {
            warn!("failed to render notification body: {e}");
            self.message.body.clone()
        });

        self.mailer
            .send(MailMessage {
                body,
                ..self.message.clone()
            })
            .await
    }
}
