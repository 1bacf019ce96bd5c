pub mod mock;
pub mod serial;
pub mod stream;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bytes exactly as they came off the link, in arrival order.
pub type Chunk = Vec<u8>;

/// Trait for links to the station's microcontroller.
///
/// Implementations spawn a background reader that forwards raw bytes to an
/// mpsc channel. The receiver is returned from the `start` method; the reader
/// stops when the cancellation token is cancelled or the receiver is dropped.
#[async_trait]
pub trait LinkReceiver: Send + Sync + 'static {
    /// Error type for this link implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the link and start forwarding bytes.
    async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Chunk>, Self::Error>;
}
