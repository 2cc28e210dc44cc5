use async_trait::async_trait;
use tracing::warn;

use super::{Notifier, NotifyError};

/// Writes alerts to the service log instead of delivering them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        warn!(recipient, subject, body, "alert");
        Ok(())
    }
}
