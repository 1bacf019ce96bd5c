use std::time::Duration;

use bluesense_core::StatusEvent;
use bluesense_core::protocol::{Command, CommandTable, Packet, PacketBytes, verify};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::aggregator::{Aggregator, SensorFailurePolicy};
use crate::config::SessionConfig;
use crate::framer;
use crate::link::stream::{ByteStream, StreamError};
use crate::reporter::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Scanning for the zero sentinel.
    Establishing,
    /// Reading, validating and aggregating packets.
    Retrieving,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub report_interval: Duration,
    pub poll_interval: Duration,
    pub sensor_failure_policy: SensorFailurePolicy,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            report_interval: config.report_interval(),
            poll_interval: config.poll_interval(),
            sensor_failure_policy: config.sensor_failure_policy,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("link failed: {0}")]
    Link(#[from] StreamError),
}

/// The read-aggregate-report loop for one station.
pub struct Session<R: Reporter> {
    stream: ByteStream,
    table: CommandTable,
    aggregator: Aggregator,
    reporter: R,
    settings: SessionSettings,
    state: SessionState,
    last_report: Instant,
}

impl<R: Reporter> Session<R> {
    pub fn new(
        stream: ByteStream,
        table: CommandTable,
        reporter: R,
        settings: SessionSettings,
    ) -> Self {
        Self {
            stream,
            table,
            aggregator: Aggregator::new(),
            reporter,
            settings,
            state: SessionState::Establishing,
            last_report: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Run until the link closes. There is no other way out: framing loss
    /// sends the session back to scanning for a sentinel.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        self.emit(StatusEvent::info("program started")).await;

        loop {
            match self.state {
                SessionState::Establishing => self.establish().await?,
                SessionState::Retrieving => self.retrieve().await?,
            }
        }
    }

    #[instrument(name = "establish", skip_all)]
    async fn establish(&mut self) -> Result<(), SessionError> {
        info!("establishing connection...");
        self.emit(StatusEvent::info("establishing connection..."))
            .await;

        framer::establish(&mut self.stream).await?;

        info!("connection established, retrieving data...");
        self.emit(StatusEvent::success(
            "connection established, retrieving data...",
        ))
        .await;
        self.state = SessionState::Retrieving;
        Ok(())
    }

    #[instrument(name = "retrieve", skip_all)]
    async fn retrieve(&mut self) -> Result<(), SessionError> {
        self.last_report = Instant::now();

        loop {
            let block = match self.stream.read_packet().await {
                Ok(block) => block,
                Err(StreamError::Timeout) => {
                    warn!("Timed out reading packet");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if !verify(&block) {
                break;
            }

            self.process(&block).await;

            if self.last_report.elapsed() > self.settings.report_interval {
                self.last_report = Instant::now();
                self.report().await;
            }

            if !self.settings.poll_interval.is_zero() {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }

        warn!("broken packet found, disconnected");
        self.emit(StatusEvent::error("broken packet found, disconnected"))
            .await;
        self.state = SessionState::Establishing;
        Ok(())
    }

    /// Decode a validated packet into the aggregator.
    pub async fn process(&mut self, block: &PacketBytes) {
        let packet = Packet::decode(block);
        let header = packet.header;
        trace!(
            message_id = header.message_id,
            response_id = header.response_id,
            command_id = header.command_id,
            "Packet received"
        );

        match self.table.lookup(header.command_id) {
            Some(Command::Metric(metric)) => {
                let value = metric.format.decode(&packet.payload);
                if let Err(e) = self.aggregator.record(&metric.key, &metric.sensor, value) {
                    warn!(error = %e, "Dropping sample");
                }
            }
            Some(Command::SensorFailed(failure)) => {
                warn!(sensor = %failure.sensor, "fail to read sensor data");
                self.aggregator.sensor_failed(&failure.sensor);
                self.emit(StatusEvent::error(format!(
                    "fail to read {} data",
                    failure.sensor
                )))
                .await;
            }
            None => debug!(command_id = header.command_id, "Ignoring unknown command"),
        }
    }

    /// Post the summary of the current interval and start a new one.
    ///
    /// If any tracked metric has no samples, an error event is posted
    /// instead. Samples are cleared either way, and failed posts are not
    /// retried.
    pub async fn report(&mut self) {
        let summary = self
            .aggregator
            .summarize(self.settings.sensor_failure_policy, jiff::Timestamp::now());

        match summary {
            Ok(summary) => {
                info!(metrics = summary.metrics.len(), "Posting summary");
                if let Err(e) = self.reporter.post_summary(&summary).await {
                    error!(error = %e, "Failed to post summary");
                }
            }
            Err(e) => {
                warn!(error = %e, "data collecting failed");
                self.emit(StatusEvent::error("data collecting failed")).await;
            }
        }
    }

    async fn emit(&self, event: StatusEvent) {
        if let Err(e) = self.reporter.post_event(&event).await {
            error!(error = %e, message = %event.message, "Failed to post status event");
        }
    }
}
