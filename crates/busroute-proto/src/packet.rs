//! Packet type combining header and payload.
//!
//! Layout on the wire: `[PacketHeader: 64 bytes] + [payload: variable bytes]`.
//! There is no other framing; the header's `payload_size` delimits packets
//! on a stream.

use bytes::{BufMut, Bytes};

use crate::{
    Endpoint, PacketHeader, RouteCode,
    errors::{ProtocolError, Result},
};

/// Complete packet as it travels between processes.
///
/// # Invariants
///
/// - `payload.len()` matches `header.payload_size()`. Enforced by
///   [`Packet::new`] and verified by [`Packet::decode`].
/// - `payload.len()` never exceeds [`PacketHeader::MAX_PAYLOAD_SIZE`] on the
///   wire. Oversized packets are rejected by [`Packet::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header
    pub header: PacketHeader,

    /// Opaque payload, forwarded byte-for-byte
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet, setting `payload_size` from the payload.
    #[must_use]
    pub fn new(mut header: PacketHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // INVARIANT: Bytes is bounded by isize::MAX and the protocol limit is far
        // below u32::MAX, so oversized payloads are caught by encode() instead.
        let payload_len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        header.set_payload_size(payload_len);

        Self { header, payload }
    }

    /// Application packet from `src` to `dst`.
    #[must_use]
    pub fn application(
        module: u16,
        msg_id: u32,
        src: Endpoint,
        dst: Endpoint,
        payload: impl Into<Bytes>,
    ) -> Self {
        let mut header = PacketHeader::new(module, msg_id);
        header.set_src(src);
        header.set_dst(dst);
        Self::new(header, payload)
    }

    /// Decoded source endpoint.
    #[must_use]
    pub fn src(&self) -> Endpoint {
        self.header.src()
    }

    /// Decoded destination endpoint.
    #[must_use]
    pub fn dst(&self) -> Endpoint {
        self.header.dst()
    }

    /// Route error code carried by this packet.
    #[must_use]
    pub fn err_code(&self) -> RouteCode {
        self.header.err_code()
    }

    /// This packet with its error code replaced.
    #[must_use]
    pub fn with_err_code(mut self, code: RouteCode) -> Self {
        self.header.set_err_code(code);
        self
    }

    /// This packet with its source and destination rewritten.
    #[must_use]
    pub fn readdressed(mut self, src: Endpoint, dst: Endpoint) -> Self {
        self.header.set_src(src);
        self.header.set_dst(dst);
        self
    }

    /// Total encoded size.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        PacketHeader::SIZE + self.payload.len()
    }

    /// Encode packet into buffer.
    ///
    /// # Errors
    ///
    /// `ProtocolError::PayloadTooLarge` if the payload exceeds
    /// [`PacketHeader::MAX_PAYLOAD_SIZE`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > PacketHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: PacketHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode a packet from the front of `bytes`.
    ///
    /// Trailing bytes past the declared payload are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if header parsing fails
    /// - `ProtocolError::PacketTruncated` if the payload is shorter than the
    ///   header declares
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = PacketHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = PacketHeader::SIZE + payload_size;

        let Some(payload) = bytes.get(PacketHeader::SIZE..total_size) else {
            return Err(ProtocolError::PacketTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(PacketHeader::SIZE),
            });
        };

        Ok(Self { header: *header, payload: Bytes::copy_from_slice(payload) })
    }
}
