//! CBOR-encoded control messages.
//!
//! Application payloads are opaque to the fabric. Only the registration
//! handshake between leaves, agents and route servers has a body the fabric
//! reads, and it is CBOR so new fields can be added without breaking older
//! peers (`#[serde(default)]` on every optional field).

pub mod register;

use bytes::BufMut;
pub use register::{ServerInfo, ServerInfoList, ServerState};

use crate::{
    ControlOpcode, Endpoint, Packet, PacketHeader,
    errors::{ProtocolError, Result},
};

/// Body of a control-module packet.
///
/// The variant is identified by the header's control opcode, so only the
/// inner list is serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPayload {
    /// Register servers with the receiver
    ServerRegister(ServerInfoList),
    /// Acknowledge a leaf registration
    ServerRegisterReply(ServerInfoList),
    /// Leaf set reachable through the sending agent
    RouteAnnounce(ServerInfoList),
}

impl ControlPayload {
    /// Opcode corresponding to this payload.
    #[must_use]
    pub const fn opcode(&self) -> ControlOpcode {
        match self {
            Self::ServerRegister(_) => ControlOpcode::ServerRegister,
            Self::ServerRegisterReply(_) => ControlOpcode::ServerRegisterReply,
            Self::RouteAnnounce(_) => ControlOpcode::RouteAnnounce,
        }
    }

    /// Server list carried by any variant.
    #[must_use]
    pub fn servers(&self) -> &[ServerInfo] {
        match self {
            Self::ServerRegister(list) | Self::ServerRegisterReply(list) | Self::RouteAnnounce(list) => {
                &list.servers
            },
        }
    }

    /// Consume into the server list.
    #[must_use]
    pub fn into_servers(self) -> Vec<ServerInfo> {
        match self {
            Self::ServerRegister(list) | Self::ServerRegisterReply(list) | Self::RouteAnnounce(list) => {
                list.servers
            },
        }
    }

    /// Encode the body (without variant tag).
    ///
    /// # Errors
    ///
    /// `ProtocolError::CborEncode` if serialization fails.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let list = match self {
            Self::ServerRegister(list) | Self::ServerRegisterReply(list) | Self::RouteAnnounce(list) => list,
        };
        ciborium::ser::into_writer(list, dst.writer())
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode a body for a known opcode.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if `bytes` exceeds the packet limit
    /// - `ProtocolError::CborDecode` if the body is not a server list
    pub fn decode(opcode: ControlOpcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > PacketHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: PacketHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let list: ServerInfoList =
            ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))?;

        Ok(match opcode {
            ControlOpcode::ServerRegister => Self::ServerRegister(list),
            ControlOpcode::ServerRegisterReply => Self::ServerRegisterReply(list),
            ControlOpcode::RouteAnnounce => Self::RouteAnnounce(list),
        })
    }

    /// Wrap into a control packet addressed `src` → `dst`.
    ///
    /// # Errors
    ///
    /// `ProtocolError::CborEncode` if serialization fails.
    pub fn into_packet(self, src: Endpoint, dst: Endpoint) -> Result<Packet> {
        let mut body = Vec::new();
        self.encode(&mut body)?;

        let mut header = PacketHeader::control(self.opcode());
        header.set_src(src);
        header.set_dst(dst);
        Ok(Packet::new(header, body))
    }

    /// Extract the control body of a packet.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::NotControl` for application packets
    /// - `ProtocolError::UnknownOpcode` for unrecognized control opcodes
    /// - `ProtocolError::CborDecode` for malformed bodies
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        if !packet.header.is_control() {
            return Err(ProtocolError::NotControl(packet.header.module()));
        }
        let opcode = packet
            .header
            .control_opcode()
            .ok_or(ProtocolError::UnknownOpcode(packet.header.msg_id()))?;
        Self::decode(opcode, &packet.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BusId, ServerType};

    fn leaf() -> ServerInfo {
        ServerInfo::new(BusId::parse("1.1.7.2").unwrap(), "logic-2")
            .with_url("tcp://10.0.0.7:7002")
    }

    #[test]
    fn packet_carries_opcode_and_body() {
        let src = Endpoint::of(BusId::parse("1.1.3.1").unwrap());
        let dst = Endpoint::of(BusId::parse("1.0.2.1").unwrap());
        let payload = ControlPayload::RouteAnnounce(vec![leaf()].into());

        let packet = payload.clone().into_packet(src, dst).unwrap();
        assert!(packet.header.is_control());
        assert_eq!(packet.header.control_opcode(), Some(ControlOpcode::RouteAnnounce));
        assert_eq!(packet.src(), src);

        assert_eq!(ControlPayload::from_packet(&packet).unwrap(), payload);
    }

    #[test]
    fn from_packet_rejects_application_traffic() {
        let packet = Packet::application(4, 1, Endpoint::default(), Endpoint::default(), &b""[..]);
        assert_eq!(ControlPayload::from_packet(&packet), Err(ProtocolError::NotControl(4)));
    }

    #[test]
    fn from_packet_rejects_unknown_opcode() {
        let packet = Packet::new(PacketHeader::new(PacketHeader::CONTROL_MODULE, 99), &b""[..]);
        assert_eq!(ControlPayload::from_packet(&packet), Err(ProtocolError::UnknownOpcode(99)));
    }

    #[test]
    fn garbage_body_is_decode_error() {
        let err = ControlPayload::decode(ControlOpcode::ServerRegister, &[0xff, 0x00, 0x13]);
        assert!(matches!(err, Err(ProtocolError::CborDecode(_))));
    }

    #[test]
    fn missing_optional_fields_default() {
        #[derive(serde::Serialize)]
        struct OldInfo {
            server_type: ServerType,
            bus_id: BusId,
            server_name: String,
            url: String,
            is_cross_server: bool,
        }
        #[derive(serde::Serialize)]
        struct OldList {
            servers: Vec<OldInfo>,
        }

        let old = OldList {
            servers: vec![OldInfo {
                server_type: ServerType::GAME,
                bus_id: BusId::parse("1.1.5.1").unwrap(),
                server_name: "game-1".into(),
                url: String::new(),
                is_cross_server: true,
            }],
        };
        let mut body = Vec::new();
        ciborium::ser::into_writer(&old, &mut body).unwrap();

        let decoded = ControlPayload::decode(ControlOpcode::ServerRegister, &body).unwrap();
        let info = &decoded.servers()[0];
        assert_eq!(info.state, ServerState::Normal);
        assert_eq!(info.port, 0);
        assert!(info.is_cross_server);
    }
}
