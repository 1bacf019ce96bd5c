pub mod aggregator;
pub mod config;
pub mod framer;
pub mod link;
pub mod reporter;
pub mod session;

pub use aggregator::{AggregationError, Aggregator, SensorFailurePolicy};
pub use config::{Config, ConfigError, LinkConfig, ReporterConfig, SessionConfig};
pub use link::mock::MockLink;
pub use link::serial::SerialLink;
pub use link::stream::{ByteStream, StreamError};
pub use link::{Chunk, LinkReceiver};
pub use reporter::Reporter;
pub use reporter::http::{Credentials, HttpReporter};
pub use reporter::log::LogReporter;
pub use reporter::memory::MemoryReporter;
pub use session::{Session, SessionError, SessionSettings, SessionState};
