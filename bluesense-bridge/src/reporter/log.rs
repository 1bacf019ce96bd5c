use async_trait::async_trait;
use bluesense_core::{StatusEvent, Summary};
use tracing::info;

use super::Reporter;

/// Dry-run reporter: writes every record to the log instead of posting it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    type Error = serde_json::Error;

    async fn post_event(&self, event: &StatusEvent) -> Result<(), Self::Error> {
        let record = serde_json::to_string(event)?;
        info!(channel = "error", %record, "Status event");
        Ok(())
    }

    async fn post_summary(&self, summary: &Summary) -> Result<(), Self::Error> {
        let record = serde_json::to_string(summary)?;
        info!(channel = "data", %record, "Summary");
        Ok(())
    }
}
