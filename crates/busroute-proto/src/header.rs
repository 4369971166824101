//! Packet header with zero-copy parsing.
//!
//! The `PacketHeader` is a fixed 64-byte structure serialized as raw binary
//! (Big Endian). Routers read the addressing fields straight out of the
//! receive buffer and never deserialize the payload.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Endpoint, RouteCode,
    errors::{ProtocolError, Result},
};

/// Opcodes of the control module (`module == 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOpcode {
    /// Register one or more servers with the receiver.
    ServerRegister,
    /// Agent acknowledgement of a leaf registration.
    ServerRegisterReply,
    /// Agent → route server: the leaf set reachable through the agent.
    RouteAnnounce,
}

impl ControlOpcode {
    /// Decode a control `msg_id`.
    #[must_use]
    pub const fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::ServerRegister),
            2 => Some(Self::ServerRegisterReply),
            3 => Some(Self::RouteAnnounce),
            _ => None,
        }
    }

    /// Wire value.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::ServerRegister => 1,
            Self::ServerRegisterReply => 2,
            Self::RouteAnnounce => 3,
        }
    }
}

/// Fixed 64-byte packet header (Big Endian network byte order)
///
/// Multi-byte integers are stored as byte arrays so the struct has alignment
/// 1 and every 64-byte pattern is a valid value.
///
/// ```text
///  0      4  5  6     8         12        16        24        32        40        48     52          64
/// +------+--+--+-----+---------+---------+---------+---------+---------+---------+------+-----------+
/// |magic |v |fl|modul| msg_id  | payload | param1  | param2  | src_id  | dst_id  | err  | reserved  |
/// +------+--+--+-----+---------+---------+---------+---------+---------+---------+------+-----------+
/// ```
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct PacketHeader {
    magic: [u8; 4],
    version: u8,
    flags: u8,
    module: [u8; 2],
    msg_id: [u8; 4],
    pub(crate) payload_size: [u8; 4],
    param1: [u8; 8],
    param2: [u8; 8],
    src_id: [u8; 8],
    dst_id: [u8; 8],
    err_code: [u8; 4],
    reserved: [u8; 12],
}

impl PacketHeader {
    /// Size of the serialized header.
    pub const SIZE: usize = 64;

    /// Magic number: "BUSR" in ASCII.
    pub const MAGIC: u32 = 0x4255_5352;

    /// Current protocol version.
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (16 MB).
    pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

    /// Module number reserved for control messages.
    pub const CONTROL_MODULE: u16 = 0;

    /// Create a header for `module`/`msg_id` with every other field zeroed.
    #[must_use]
    pub fn new(module: u16, msg_id: u32) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            module: module.to_be_bytes(),
            msg_id: msg_id.to_be_bytes(),
            payload_size: [0; 4],
            param1: [0; 8],
            param2: [0; 8],
            src_id: [0; 8],
            dst_id: [0; 8],
            err_code: [0; 4],
            reserved: [0; 12],
        }
    }

    /// Create a control-module header.
    #[must_use]
    pub fn control(opcode: ControlOpcode) -> Self {
        Self::new(Self::CONTROL_MODULE, opcode.to_u32())
    }

    /// Parse header from network bytes (zero-copy)
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PacketTooShort` if buffer is shorter than 64 bytes
    /// - `ProtocolError::InvalidMagic` if magic number is invalid
    /// - `ProtocolError::UnsupportedVersion` if protocol version is unsupported
    /// - `ProtocolError::PayloadTooLarge` if payload size exceeds maximum
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::PacketTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Protocol magic number.
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Raw flag bits. Opaque to routing.
    #[must_use]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Application module, or [`Self::CONTROL_MODULE`].
    #[must_use]
    pub fn module(&self) -> u16 {
        u16::from_be_bytes(self.module)
    }

    /// Message id within the module. Opaque to routing.
    #[must_use]
    pub fn msg_id(&self) -> u32 {
        u32::from_be_bytes(self.msg_id)
    }

    /// Whether this packet belongs to the control module.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.module() == Self::CONTROL_MODULE
    }

    /// Control opcode. `None` for application packets and unknown opcodes.
    #[must_use]
    pub fn control_opcode(&self) -> Option<ControlOpcode> {
        if self.is_control() { ControlOpcode::from_u32(self.msg_id()) } else { None }
    }

    /// Payload size in bytes (max 16 MB).
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// First application parameter.
    #[must_use]
    pub fn param1(&self) -> u64 {
        u64::from_be_bytes(self.param1)
    }

    /// Second application parameter.
    #[must_use]
    pub fn param2(&self) -> u64 {
        u64::from_be_bytes(self.param2)
    }

    /// Raw source handle.
    #[must_use]
    pub fn src_id(&self) -> u64 {
        u64::from_be_bytes(self.src_id)
    }

    /// Raw destination handle.
    #[must_use]
    pub fn dst_id(&self) -> u64 {
        u64::from_be_bytes(self.dst_id)
    }

    /// Decoded source endpoint.
    #[must_use]
    pub fn src(&self) -> Endpoint {
        Endpoint::from_u64(self.src_id())
    }

    /// Decoded destination endpoint.
    #[must_use]
    pub fn dst(&self) -> Endpoint {
        Endpoint::from_u64(self.dst_id())
    }

    /// Route error code.
    #[must_use]
    pub fn err_code(&self) -> RouteCode {
        RouteCode::from_i32(i32::from_be_bytes(self.err_code))
    }

    /// Update flag bits.
    pub fn set_flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    /// Set first application parameter.
    pub fn set_param1(&mut self, value: u64) {
        self.param1 = value.to_be_bytes();
    }

    /// Set second application parameter.
    pub fn set_param2(&mut self, value: u64) {
        self.param2 = value.to_be_bytes();
    }

    /// Set source endpoint.
    pub fn set_src(&mut self, src: Endpoint) {
        self.src_id = src.to_u64().to_be_bytes();
    }

    /// Set destination endpoint.
    pub fn set_dst(&mut self, dst: Endpoint) {
        self.dst_id = dst.to_u64().to_be_bytes();
    }

    /// Set route error code.
    pub fn set_err_code(&mut self, code: RouteCode) {
        self.err_code = code.to_i32().to_be_bytes();
    }

    /// Set payload size.
    pub fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketHeader")
            .field("version", &self.version())
            .field("flags", &format!("{:#04x}", self.flags()))
            .field("module", &self.module())
            .field("msg_id", &self.msg_id())
            .field("payload_size", &self.payload_size())
            .field("src", &self.src())
            .field("dst", &self.dst())
            .field("err_code", &self.err_code())
            .finish_non_exhaustive()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for PacketHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PacketHeader {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BusId, ServerType};

    #[test]
    fn header_is_64_bytes() {
        assert_eq!(std::mem::size_of::<PacketHeader>(), PacketHeader::SIZE);
    }

    #[test]
    fn fields_land_at_documented_offsets() {
        let mut header = PacketHeader::new(0x0102, 0x0304_0506);
        header.set_src(Endpoint::new(ServerType::GAME, BusId::from_raw(0x1001_0501)));
        header.set_err_code(RouteCode::NotSupported);
        header.set_payload_size(9);

        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], b"BUSR");
        assert_eq!(bytes[4], PacketHeader::VERSION);
        assert_eq!(&bytes[6..8], &[0x01, 0x02]);
        assert_eq!(&bytes[8..12], &[0x03, 0x04, 0x05, 0x06]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 9]);
        assert_eq!(&bytes[32..40], &[0, 0, 0, 5, 0x10, 0x01, 0x05, 0x01]);
        assert_eq!(&bytes[48..52], &[0, 0, 0, 2]);
    }

    #[test]
    fn parse_rejects_short_buffer() {
        let err = PacketHeader::from_bytes(&[0u8; 10]).unwrap_err();
        assert_eq!(err, ProtocolError::PacketTooShort { expected: 64, actual: 10 });
    }

    #[test]
    fn parse_rejects_bad_magic_and_version() {
        let mut bytes = PacketHeader::new(1, 1).to_bytes();
        bytes[0] = b'X';
        assert_eq!(PacketHeader::from_bytes(&bytes).unwrap_err(), ProtocolError::InvalidMagic);

        let mut bytes = PacketHeader::new(1, 1).to_bytes();
        bytes[4] = 9;
        assert_eq!(
            PacketHeader::from_bytes(&bytes).unwrap_err(),
            ProtocolError::UnsupportedVersion(9)
        );
    }

    #[test]
    fn parse_rejects_oversized_payload_claim() {
        let mut header = PacketHeader::new(1, 1);
        header.set_payload_size(PacketHeader::MAX_PAYLOAD_SIZE + 1);
        assert!(matches!(
            PacketHeader::from_bytes(&header.to_bytes()),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn control_opcode_only_for_control_module() {
        let header = PacketHeader::control(ControlOpcode::RouteAnnounce);
        assert_eq!(header.control_opcode(), Some(ControlOpcode::RouteAnnounce));

        let app = PacketHeader::new(5, ControlOpcode::RouteAnnounce.to_u32());
        assert_eq!(app.control_opcode(), None);
    }
}
