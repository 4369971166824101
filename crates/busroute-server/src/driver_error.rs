//! Driver error types.
//!
//! Errors a driver returns from `process_event`. None of them stop the node:
//! the runtime logs the error and carries on with the next event. Routing
//! misses never show up here; they are bounced packets.

use busroute_core::{LinkId, RegistryError, RouteError};
use busroute_proto::{ControlOpcode, ProtocolError};

/// Errors that can occur while a driver processes an event.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Application traffic on a link nobody registered.
    ///
    /// A peer must send `ServerRegister` before anything else. The packet
    /// is dropped; the peer can register and resend.
    #[error("traffic on unregistered link {0}")]
    UnknownLink(LinkId),

    /// Control message this node never accepts from that link.
    #[error("unexpected {opcode:?} on link {link_id}")]
    UnexpectedControl {
        /// Link the message arrived on
        link_id: LinkId,
        /// Opcode received
        opcode: ControlOpcode,
    },

    /// Malformed control packet or a reply that could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Route server could not attribute a packet.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Registry update on a record that vanished.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
