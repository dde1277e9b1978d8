// src/notify/console.rs
use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use super::Notifier;

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn name(&self) -> &str {
        "console"
    }

    async fn notify(&self, text: &str) -> Result<()> {
        info!(target: "triage", "{text}");
        Ok(())
    }

    async fn notify_urgent(&self, text: &str) -> Result<()> {
        warn!(target: "triage", "{text}");
        Ok(())
    }
}
