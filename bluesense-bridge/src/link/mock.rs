use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluesense_core::protocol::{
    CommandTable, FailureCommand, MetricCommand, PACKET_SIZE, Packet, PacketHeader,
};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Chunk, LinkReceiver};

/// Simulated station that speaks the wire protocol without hardware.
///
/// On start it emits a little line noise and a zero sentinel, then one
/// sealed packet per interval. Packets are occasionally replaced by sensor
/// failures, or corrupted and followed by a fresh sentinel.
pub struct MockLink {
    packet_interval: Duration,
    corruption_ratio: f64,
    sensor_failure_ratio: f64,
    metrics: Arc<Vec<MetricCommand>>,
    failures: Arc<Vec<FailureCommand>>,
}

impl MockLink {
    pub fn new(
        table: &CommandTable,
        packet_interval_ms: u64,
        corruption_ratio: f64,
        sensor_failure_ratio: f64,
    ) -> Self {
        let mut metrics: Vec<_> = table.metrics().cloned().collect();
        metrics.sort_by_key(|m| m.id);
        let mut failures: Vec<_> = table.failures().cloned().collect();
        failures.sort_by_key(|f| f.id);

        Self {
            packet_interval: Duration::from_millis(packet_interval_ms.max(1)),
            corruption_ratio: corruption_ratio.clamp(0.0, 1.0),
            sensor_failure_ratio: sensor_failure_ratio.clamp(0.0, 1.0),
            metrics: Arc::new(metrics),
            failures: Arc::new(failures),
        }
    }
}

/// Per-run state of the simulated station.
struct MockStation {
    metrics: Arc<Vec<MetricCommand>>,
    failures: Arc<Vec<FailureCommand>>,
    corruption_ratio: f64,
    sensor_failure_ratio: f64,
    message_id: u16,
}

impl MockStation {
    fn boot_sequence(&self) -> Chunk {
        let mut rng = rand::rng();
        let mut chunk: Chunk = (0..PACKET_SIZE / 2)
            .map(|_| rng.random_range(1..=u8::MAX))
            .collect();
        chunk.extend_from_slice(&[0u8; PACKET_SIZE]);
        chunk
    }

    fn next_chunk(&mut self) -> Chunk {
        let mut rng = rand::rng();
        self.message_id = self.message_id.wrapping_add(1);

        let failed = (!self.failures.is_empty() && rng.random_bool(self.sensor_failure_ratio))
            .then(|| &self.failures[rng.random_range(0..self.failures.len())]);

        let (command_id, payload) = match (failed, self.metrics.is_empty()) {
            (Some(failure), _) => (failure.id, [0u8; 4]),
            (None, false) => {
                let metric = &self.metrics[rng.random_range(0..self.metrics.len())];
                let value = sample_value(&metric.key, &mut rng);
                (metric.id, metric.format.encode(value))
            }
            // Nothing to say: keep the line alive with a sentinel.
            (None, true) => return vec![0u8; PACKET_SIZE],
        };

        let packet = Packet {
            header: PacketHeader::new(self.message_id, 0, command_id),
            payload,
        };
        let mut chunk = packet.to_bytes().to_vec();

        if rng.random_bool(self.corruption_ratio) {
            chunk[PACKET_SIZE - 1] ^= 0x5A;
            chunk.extend_from_slice(&[0u8; PACKET_SIZE]);
        }

        chunk
    }
}

/// Plausible readings for the built-in metrics, anything else gets 0..100.
fn sample_value(key: &str, rng: &mut impl Rng) -> f64 {
    match key {
        "temperature" => rng.random_range(15.0..35.0),
        "humidity" => rng.random_range(30.0..90.0),
        "pm1_0" | "pm2_5" | "pm10" => rng.random_range(0.0..150.0),
        _ => rng.random_range(0.0..100.0),
    }
}

#[async_trait]
impl LinkReceiver for MockLink {
    type Error = std::convert::Infallible;

    async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Chunk>, Self::Error> {
        let (tx, rx) = mpsc::channel(100);

        let mut station = MockStation {
            metrics: Arc::clone(&self.metrics),
            failures: Arc::clone(&self.failures),
            corruption_ratio: self.corruption_ratio,
            sensor_failure_ratio: self.sensor_failure_ratio,
            message_id: 0,
        };
        let packet_interval = self.packet_interval;

        info!(
            metrics = station.metrics.len(),
            packet_interval_ms = packet_interval.as_millis() as u64,
            corruption_ratio = station.corruption_ratio,
            sensor_failure_ratio = station.sensor_failure_ratio,
            "Starting mock link"
        );

        tokio::spawn(async move {
            if tx.send(station.boot_sequence()).await.is_err() {
                return;
            }

            let mut interval = tokio::time::interval(packet_interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Mock link shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let chunk = station.next_chunk();
                        if tx.send(chunk).await.is_err() {
                            info!("Channel closed, mock link shutting down");
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
