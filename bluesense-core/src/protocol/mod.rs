mod command;
mod error;
mod packet;

pub use command::{
    CMD_DHT_FAILED, CMD_HUMIDITY, CMD_PM1_0, CMD_PM2_5, CMD_PM10, CMD_PM_FAILED,
    CMD_TEMPERATURE, Command, CommandTable, CommandTableError, FailureCommand, MetricCommand,
    PayloadFormat,
};
pub use error::{ParseResult, ProtocolError};
pub use packet::{Packet, PacketBytes, PacketHeader, checksum, seal, verify};

// packet structure : header(6) + payload(4) + checksum(2)

pub const PACKET_HEADER_SIZE: usize = 6;
pub const PAYLOAD_SIZE: usize = 4;
pub const CHECKSUM_SIZE: usize = 2;
pub const PACKET_SIZE: usize = PACKET_HEADER_SIZE + PAYLOAD_SIZE + CHECKSUM_SIZE;
