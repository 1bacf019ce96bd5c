use bluesense_core::protocol::PACKET_SIZE;
use tracing::{debug, info};

use crate::link::stream::{ByteStream, StreamError};

/// What it took to find the start of a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramingStats {
    /// Bytes read before the sentinel run that completed framing.
    pub discarded: usize,
    /// Reads that timed out while scanning.
    pub timeouts: usize,
}

/// Scan the stream for a run of `PACKET_SIZE` zero bytes.
///
/// The station sends an all-zero packet as a sentinel; the stream is aligned
/// to packet boundaries right after it. Any non-zero byte, or a read that
/// times out, restarts the run. Returns only once framing is acquired or the
/// link closes.
pub async fn establish(stream: &mut ByteStream) -> Result<FramingStats, StreamError> {
    let mut stats = FramingStats::default();
    let mut zero_count = 0usize;

    while zero_count < PACKET_SIZE {
        match stream.read_byte().await {
            Ok(0) => zero_count += 1,
            Ok(byte) => {
                stats.discarded += zero_count + 1;
                zero_count = 0;
                info!(byte, "broken packet found, retrying...");
            }
            Err(StreamError::Timeout) => {
                stats.discarded += zero_count;
                stats.timeouts += 1;
                zero_count = 0;
                debug!("Timed out waiting for sentinel, retrying...");
            }
            Err(StreamError::Closed) => return Err(StreamError::Closed),
        }
    }

    info!(
        discarded = stats.discarded,
        timeouts = stats.timeouts,
        "empty packet found"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;

    /// Collects the level and message of every event.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<(Level, String)>>>);

    struct MessageVisitor<'a>(&'a mut String);

    impl Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                *self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for Captured {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.0
                .lock()
                .unwrap()
                .push((*event.metadata().level(), message));
        }
    }

    async fn stream_of(chunks: Vec<Vec<u8>>) -> ByteStream {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(chunk).await.unwrap();
        }
        ByteStream::new(rx, None)
    }

    #[tokio::test]
    async fn acquires_on_exact_sentinel() {
        let mut stream = stream_of(vec![vec![0; PACKET_SIZE], vec![0xAB]]).await;

        let stats = establish(&mut stream).await.unwrap();
        assert_eq!(stats, FramingStats::default());

        // aligned right after the sentinel
        assert_eq!(stream.read_byte().await.unwrap(), 0xAB);
    }

    #[tokio::test]
    async fn non_zero_byte_resets_the_run() {
        let mut bytes = vec![0; PACKET_SIZE - 1];
        bytes.push(7);
        bytes.extend(vec![0; PACKET_SIZE]);
        bytes.push(0x42);
        let mut stream = stream_of(vec![bytes]).await;

        let stats = establish(&mut stream).await.unwrap();
        assert_eq!(stats.discarded, PACKET_SIZE);
        assert_eq!(stream.read_byte().await.unwrap(), 0x42);
    }

    #[tokio::test]
    async fn short_runs_never_acquire() {
        let mut bytes = Vec::new();
        for _ in 0..10 {
            bytes.extend(vec![0; PACKET_SIZE - 1]);
            bytes.push(1);
        }
        let mut stream = stream_of(vec![bytes]).await;

        assert_eq!(establish(&mut stream).await, Err(StreamError::Closed));
    }

    #[tokio::test]
    async fn extra_zeros_stay_in_the_stream() {
        let mut stream = stream_of(vec![vec![0; PACKET_SIZE + 3]]).await;

        establish(&mut stream).await.unwrap();
        for _ in 0..3 {
            assert_eq!(stream.read_byte().await.unwrap(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_breaks_the_run() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = ByteStream::new(rx, Some(Duration::from_secs(15)));

        tx.send(vec![0; PACKET_SIZE - 1]).await.unwrap();
        let feeder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            tx.send(vec![0; PACKET_SIZE]).await.unwrap();
        });

        let stats = establish(&mut stream).await.unwrap();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.discarded, PACKET_SIZE - 1);
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn resync_is_logged_at_info() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut bytes = vec![0; 3];
        bytes.push(9);
        bytes.extend(vec![0; PACKET_SIZE]);
        let mut stream = stream_of(vec![bytes]).await;

        establish(&mut stream).await.unwrap();

        let events = captured.0.lock().unwrap().clone();
        assert!(events.contains(&(Level::INFO, "broken packet found, retrying...".to_owned())));
        assert!(events.contains(&(Level::INFO, "empty packet found".to_owned())));
    }
}
