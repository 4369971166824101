//! Fuzz target for Packet::decode
//!
//! Feeds arbitrary byte sequences to the packet decoder, looking for:
//! - Parser panics
//! - Size arithmetic overflows
//! - Reads past the end of the buffer
//!
//! The decoder must never panic. Invalid input returns an error.

#![no_main]

use busroute_proto::{Packet, PacketHeader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(packet) = Packet::decode(data) else {
        return;
    };

    // A decoded packet re-encodes to exactly the bytes it was read from.
    let mut buf = Vec::with_capacity(packet.encoded_len());
    packet.encode(&mut buf).expect("decoded packet must re-encode");
    assert_eq!(buf.len(), PacketHeader::SIZE + packet.payload.len());
    assert_eq!(&buf[..], &data[..buf.len()]);
});
