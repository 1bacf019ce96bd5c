pub mod http;
pub mod log;
pub mod memory;

use async_trait::async_trait;
use bluesense_core::{StatusEvent, Summary};

/// Sink for everything the bridge sends upstream.
///
/// Posts are fire-and-forget from the session's point of view: a failed post
/// is logged by the caller and never retried.
#[async_trait]
pub trait Reporter: Send + Sync + 'static {
    /// Error type specific to this reporter implementation
    type Error: std::error::Error + Send + Sync + 'static;

    /// Post an entry to the error/status channel.
    async fn post_event(&self, event: &StatusEvent) -> Result<(), Self::Error>;

    /// Post the summary of one report interval to the data channel.
    async fn post_summary(&self, summary: &Summary) -> Result<(), Self::Error>;
}
