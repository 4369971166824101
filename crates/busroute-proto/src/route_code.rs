//! Error codes set by routers on bounced packets.

use std::fmt;

/// Value of the header `err_code` field.
///
/// Routers only ever set [`RouteCode::DestNotExist`] and
/// [`RouteCode::NotSupported`]. Any other value is preserved untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RouteCode {
    /// Not a bounce
    #[default]
    None,
    /// No live destination after the full fallback chain
    DestNotExist,
    /// Needs cross-server capability the node lacks
    NotSupported,
    /// Code owned by the application
    Other(i32),
}

impl RouteCode {
    /// Decode the wire value.
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::None,
            1 => Self::DestNotExist,
            2 => Self::NotSupported,
            other => Self::Other(other),
        }
    }

    /// Set by a router when it gave up on a packet.
    ///
    /// Packets carrying such a code are failure notices travelling back to
    /// their sender and are never classified again.
    #[must_use]
    pub const fn is_bounce(self) -> bool {
        matches!(self, Self::DestNotExist | Self::NotSupported)
    }

    /// Wire value.
    #[must_use]
    pub const fn to_i32(self) -> i32 {
        match self {
            Self::None => 0,
            Self::DestNotExist => 1,
            Self::NotSupported => 2,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for RouteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::DestNotExist => f.write_str("destination does not exist"),
            Self::NotSupported => f.write_str("not supported"),
            Self::Other(code) => write!(f, "code {code}"),
        }
    }
}
