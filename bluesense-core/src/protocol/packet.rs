use super::{error::ParseResult, error::ProtocolError, *};

/// A raw, packet-sized block as read from the link.
pub type PacketBytes = [u8; PACKET_SIZE];

/// Additive checksum: the sum of all bytes modulo 65536.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &byte| acc.wrapping_add(u16::from(byte)))
}

fn trailer(block: &PacketBytes) -> u16 {
    u16::from_le_bytes([block[PACKET_SIZE - 2], block[PACKET_SIZE - 1]])
}

/// Returns true iff the checksum of everything but the trailer matches the
/// little-endian trailer.
pub fn verify(block: &PacketBytes) -> bool {
    checksum(&block[..PACKET_SIZE - CHECKSUM_SIZE]) == trailer(block)
}

/// Write the checksum of the block's body into its trailer.
pub fn seal(block: &mut PacketBytes) {
    let sum = checksum(&block[..PACKET_SIZE - CHECKSUM_SIZE]);
    block[PACKET_SIZE - CHECKSUM_SIZE..].copy_from_slice(&sum.to_le_bytes());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub message_id: u16,
    pub response_id: u16,
    pub command_id: u16,
}

impl PacketHeader {
    pub fn new(message_id: u16, response_id: u16, command_id: u16) -> Self {
        Self {
            message_id,
            response_id,
            command_id,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> ParseResult<Self> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: PACKET_HEADER_SIZE,
                available: bytes.len(),
            });
        }

        Ok(Self {
            message_id: u16::from_le_bytes([bytes[0], bytes[1]]),
            response_id: u16::from_le_bytes([bytes[2], bytes[3]]),
            command_id: u16::from_le_bytes([bytes[4], bytes[5]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut bytes = [0u8; PACKET_HEADER_SIZE];

        bytes[0..2].copy_from_slice(&self.message_id.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.response_id.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.command_id.to_le_bytes());

        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Packet {
    pub fn new(command_id: u16, payload: [u8; PAYLOAD_SIZE]) -> Self {
        Self {
            header: PacketHeader::new(0, 0, command_id),
            payload,
        }
    }

    /// Parse a packet from the front of `bytes`, rejecting it if the
    /// checksum does not match.
    pub fn from_bytes(bytes: &[u8]) -> ParseResult<Self> {
        let block: &PacketBytes = bytes
            .get(..PACKET_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or(ProtocolError::InsufficientData {
                needed: PACKET_SIZE,
                available: bytes.len(),
            })?;

        if !verify(block) {
            return Err(ProtocolError::ChecksumMismatch {
                expected: trailer(block),
                actual: checksum(&block[..PACKET_SIZE - CHECKSUM_SIZE]),
            });
        }

        Ok(Self::decode(block))
    }

    /// Split a block into header and payload without looking at the checksum.
    pub fn decode(block: &PacketBytes) -> Self {
        let [m0, m1, r0, r1, c0, c1, p0, p1, p2, p3, _, _] = *block;

        Self {
            header: PacketHeader::new(
                u16::from_le_bytes([m0, m1]),
                u16::from_le_bytes([r0, r1]),
                u16::from_le_bytes([c0, c1]),
            ),
            payload: [p0, p1, p2, p3],
        }
    }

    /// Serialize into a sealed, packet-sized block.
    pub fn to_bytes(&self) -> PacketBytes {
        let mut bytes = [0u8; PACKET_SIZE];

        bytes[..PACKET_HEADER_SIZE].copy_from_slice(&self.header.to_bytes());
        bytes[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + PAYLOAD_SIZE]
            .copy_from_slice(&self.payload);
        seal(&mut bytes);

        bytes
    }
}
