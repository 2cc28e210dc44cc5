use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{NotifierConfig, NotifierKind};

pub mod log;
pub mod message;
pub mod webhook;

pub use log::LogNotifier;
pub use message::AlertMessage;
pub use webhook::WebhookNotifier;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification rejected: {0}")]
    Rejected(String),
    #[error("invalid notifier configuration: {0}")]
    InvalidConfiguration(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Delivers a human-readable alert.
///
/// Duplicate sends on retry must be acceptable to implementations; the engine
/// may send the same alert again after a failed attempt.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Build the notifier selected in the configuration
pub fn from_config(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match config.kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier)),
        NotifierKind::Webhook => {
            let url = config.webhook_url.as_deref().ok_or_else(|| {
                NotifyError::InvalidConfiguration("webhook notifier needs webhook_url".into())
            })?;
            let notifier = WebhookNotifier::new(url, Duration::from_secs(config.timeout_secs))?;
            Ok(Arc::new(notifier))
        }
    }
}
