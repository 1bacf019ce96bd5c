use std::io::{ErrorKind, Read};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Chunk, LinkReceiver};

/// How long a single blocking read may wait before the reader checks for
/// cancellation again. The protocol-level read timeout is enforced by
/// [`super::stream::ByteStream`], not here.
const POLL_TIMEOUT: Duration = Duration::from_millis(200);
const READ_BUFFER_SIZE: usize = 64;
const CHANNEL_DEPTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SerialLinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A UART connection to the station, 8N1 without flow control.
pub struct SerialLink {
    path: String,
    baud_rate: u32,
}

impl SerialLink {
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyACM0")
    /// * `baud_rate` - Baud rate (e.g., 9600)
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }

    fn open(&self) -> Result<Box<dyn SerialPort>, SerialLinkError> {
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_TIMEOUT)
            .open()?;

        // Drop whatever the device sent before we were listening.
        port.clear(ClearBuffer::All)?;

        Ok(port)
    }
}

#[async_trait]
impl LinkReceiver for SerialLink {
    type Error = SerialLinkError;

    async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Chunk>, Self::Error> {
        let port = self.open()?;
        info!(path = %self.path, baud_rate = self.baud_rate, "Opened serial port");

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::task::spawn_blocking(move || read_loop(port, tx, cancel));

        Ok(rx)
    }
}

fn read_loop(mut port: Box<dyn SerialPort>, tx: mpsc::Sender<Chunk>, cancel: CancellationToken) {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    while !cancel.is_cancelled() {
        match port.read(&mut buf) {
            Ok(0) => {
                info!("Serial port reached end of stream");
                break;
            }
            Ok(n) => {
                debug!(bytes = n, "Read from serial port");
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    info!("Channel closed, serial reader shutting down");
                    return;
                }
            }
            Err(e) if is_transient_error(&e) => continue,
            Err(e) => {
                error!(error = %e, "Serial read failed");
                break;
            }
        }
    }

    info!("Serial reader exiting");
}

fn is_transient_error(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock)
}
