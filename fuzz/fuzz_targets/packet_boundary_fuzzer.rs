//! Fuzz target for packet header boundary conditions
//!
//! A stalled or oversized header must never make a link allocate or panic.
//!
//! # Strategy
//!
//! - Magic: valid, off-by-one, all-zeros, random
//! - Version: valid (0x01), zero, random
//! - Payload size: zero, small, at-max, just-over-max, `u32::MAX`
//! - Body: shorter than, equal to, or longer than the declared size
//!
//! # Invariants
//!
//! - `payload_size > MAX_PAYLOAD_SIZE` MUST return `ProtocolError::PayloadTooLarge`
//! - Invalid magic MUST return `ProtocolError::InvalidMagic`
//! - A short body MUST return `ProtocolError::PacketTruncated`
//! - A decoded packet's payload length MUST equal the declared size

#![no_main]

use arbitrary::Arbitrary;
use busroute_proto::{PacketHeader, Packet, ProtocolError};
use libfuzzer_sys::fuzz_target;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const MODULE_OFFSET: usize = 6;
const MSG_ID_OFFSET: usize = 8;
const SIZE_OFFSET: usize = 12;
const SRC_OFFSET: usize = 32;
const DST_OFFSET: usize = 40;

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryPacket {
    magic: MagicBytes,
    version: VersionByte,
    module: u16,
    msg_id: u32,
    payload_size: PayloadSize,
    src: u64,
    dst: u64,
    body: BodyLength,
}

#[derive(Debug, Clone, Arbitrary)]
enum MagicBytes {
    Valid,
    OffByOne(u8),
    AllZeros,
    Random([u8; 4]),
}

#[derive(Debug, Clone, Arbitrary)]
enum VersionByte {
    Valid,
    Zero,
    Random(u8),
}

#[derive(Debug, Clone, Arbitrary)]
enum PayloadSize {
    Zero,
    Small(u8),
    AtMax,
    JustOverMax,
    MaxU32,
}

#[derive(Debug, Clone, Arbitrary)]
enum BodyLength {
    Exact,
    Short(u8),
    Long(u8),
}

impl BoundaryPacket {
    fn declared_size(&self) -> u32 {
        match self.payload_size {
            PayloadSize::Zero => 0,
            PayloadSize::Small(n) => u32::from(n),
            PayloadSize::AtMax => PacketHeader::MAX_PAYLOAD_SIZE,
            PayloadSize::JustOverMax => PacketHeader::MAX_PAYLOAD_SIZE + 1,
            PayloadSize::MaxU32 => u32::MAX,
        }
    }

    fn magic(&self) -> [u8; 4] {
        match &self.magic {
            MagicBytes::Valid => PacketHeader::MAGIC.to_be_bytes(),
            MagicBytes::OffByOne(delta) => {
                PacketHeader::MAGIC.wrapping_add(u32::from(*delta).max(1)).to_be_bytes()
            },
            MagicBytes::AllZeros => [0; 4],
            MagicBytes::Random(bytes) => *bytes,
        }
    }

    fn version(&self) -> u8 {
        match self.version {
            VersionByte::Valid => PacketHeader::VERSION,
            VersionByte::Zero => 0,
            VersionByte::Random(v) => v,
        }
    }

    /// Body length actually appended, capped so at-max sizes stay cheap.
    fn body_len(&self) -> usize {
        let declared = self.declared_size().min(4096) as usize;
        match self.body {
            BodyLength::Exact => declared,
            BodyLength::Short(n) => declared.saturating_sub(usize::from(n).max(1)),
            BodyLength::Long(n) => declared + usize::from(n),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PacketHeader::SIZE + self.body_len()];
        buf[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&self.magic());
        buf[VERSION_OFFSET] = self.version();
        buf[MODULE_OFFSET..MODULE_OFFSET + 2].copy_from_slice(&self.module.to_be_bytes());
        buf[MSG_ID_OFFSET..MSG_ID_OFFSET + 4].copy_from_slice(&self.msg_id.to_be_bytes());
        buf[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&self.declared_size().to_be_bytes());
        buf[SRC_OFFSET..SRC_OFFSET + 8].copy_from_slice(&self.src.to_be_bytes());
        buf[DST_OFFSET..DST_OFFSET + 8].copy_from_slice(&self.dst.to_be_bytes());
        buf
    }
}

fuzz_target!(|input: BoundaryPacket| {
    let bytes = input.to_bytes();
    let result = Packet::decode(&bytes);

    if input.magic() != PacketHeader::MAGIC.to_be_bytes() {
        assert!(matches!(result, Err(ProtocolError::InvalidMagic)), "bad magic accepted");
        return;
    }
    if input.version() != PacketHeader::VERSION {
        assert!(matches!(result, Err(ProtocolError::UnsupportedVersion(_))), "bad version accepted");
        return;
    }

    let declared = input.declared_size();
    if declared > PacketHeader::MAX_PAYLOAD_SIZE {
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })), "oversized payload accepted");
        return;
    }

    if input.body_len() < declared as usize {
        assert!(matches!(result, Err(ProtocolError::PacketTruncated { .. })), "short body accepted");
        return;
    }

    let packet = result.expect("well-formed packet must decode");
    assert_eq!(packet.payload.len(), declared as usize);
    assert_eq!(packet.header.module(), input.module);
    assert_eq!(packet.header.msg_id(), input.msg_id);
});
