pub type ParseResult<T> = core::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("checksum mismatch: trailer says {expected:#06x}, computed {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },
    #[error("insufficient data: needed {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },
}
