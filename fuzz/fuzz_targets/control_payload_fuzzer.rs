//! Fuzz target for control payload decoding
//!
//! Agents and route servers decode `ServerRegister`, `ServerRegisterReply`
//! and `RouteAnnounce` bodies from peers they do not trust yet.
//!
//! # Strategy
//!
//! - Arbitrary CBOR bytes under every control opcode
//! - The same bytes wrapped in a full packet with an arbitrary module and
//!   message id, so non-control and unknown-opcode paths are reached
//!
//! # Invariants
//!
//! - Decoding MUST never panic
//! - A non-control packet MUST return `ProtocolError::NotControl`
//! - A decoded payload re-encodes into a packet that decodes to itself

#![no_main]

use arbitrary::Arbitrary;
use busroute_proto::{BusId, ControlOpcode, ControlPayload, Endpoint, Packet, PacketHeader, ProtocolError};
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    module: u16,
    msg_id: u32,
    body: Vec<u8>,
}

const OPCODES: [ControlOpcode; 3] =
    [ControlOpcode::ServerRegister, ControlOpcode::ServerRegisterReply, ControlOpcode::RouteAnnounce];

fuzz_target!(|input: Input| {
    for opcode in OPCODES {
        if let Ok(payload) = ControlPayload::decode(opcode, &input.body) {
            assert_eq!(payload.opcode(), opcode);
            roundtrip(&payload);
        }
    }

    let packet = Packet::application(input.module, input.msg_id, Endpoint::of(BusId::from_raw(0)), Endpoint::of(BusId::from_raw(0)), Bytes::from(input.body));
    match ControlPayload::from_packet(&packet) {
        Ok(payload) => {
            assert_eq!(input.module, PacketHeader::CONTROL_MODULE);
            roundtrip(&payload);
        },
        Err(ProtocolError::NotControl(module)) => assert_eq!(module, input.module),
        Err(_) => {},
    }
});

fn roundtrip(payload: &ControlPayload) {
    let src = Endpoint::of(BusId::from_raw(0x1001_0301));
    let dst = Endpoint::of(BusId::from_raw(0x1000_0201));
    let packet = payload.clone().into_packet(src, dst).expect("decoded payload must re-encode");
    let again = ControlPayload::from_packet(&packet).expect("re-encoded payload must decode");
    assert_eq!(&again, payload);
}
