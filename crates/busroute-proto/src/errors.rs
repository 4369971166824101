//! Protocol error types.

use crate::bus_id::AddressError;

/// Result alias for wire-level operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while parsing or building packets.
///
/// None of these are routing failures. Routing misses travel back to the
/// sender inside a packet as a [`crate::RouteCode`]; a `ProtocolError` means
/// the bytes themselves were unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Buffer shorter than the fixed header.
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Header does not start with the protocol magic.
    #[error("invalid magic number")]
    InvalidMagic,

    /// Header carries a version this build does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Declared or actual payload exceeds the protocol maximum.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Offending size
        size: usize,
        /// Protocol limit
        max: usize,
    },

    /// Fewer payload bytes than the header declares.
    #[error("packet truncated: header declares {expected} payload bytes, got {actual}")]
    PacketTruncated {
        /// Declared payload size
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// Control payload failed to serialize.
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// Control payload failed to deserialize.
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),

    /// Packet belongs to an application module, not the control module.
    #[error("module {0} is not the control module")]
    NotControl(u16),

    /// Control packet with an opcode this build does not know.
    #[error("unknown control opcode {0}")]
    UnknownOpcode(u32),

    /// Bus address could not be built or parsed.
    #[error(transparent)]
    Address(#[from] AddressError),
}
