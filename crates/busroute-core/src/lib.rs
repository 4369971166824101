//! Routing core of the busroute fabric.
//!
//! Pure, synchronous logic with no I/O: a router takes a packet and the link
//! it arrived on and returns the forwards to perform. The runtime (see
//! `busroute-server`) owns transport and time.
//!
//! # Components
//!
//! - [`ServerRegistry`]: who is known, through which link, owned by which agent
//! - [`SentinelBand`]: maps a destination address to a [`RoutingClass`]
//! - [`RouteAgentRouter`]: per-zone proxy in front of leaf servers
//! - [`RouteServerRouter`]: relay between agents
//!
//! Both routers consult the classifier exactly once per packet and never
//! fail on a routing miss: a miss becomes a bounced packet carrying a
//! [`busroute_proto::RouteCode`] back toward the sender.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod classifier;
pub mod config;
pub mod env;
pub mod error;
pub mod registry;
pub mod relay;
pub mod router;

pub use agent::RouteAgentRouter;
pub use classifier::{RoutingClass, SentinelBand};
pub use config::NodeConfig;
pub use env::Environment;
pub use error::{ConfigError, RegistryError, RouteError};
pub use registry::{CrossScope, LinkId, PeerState, ServerRecord, ServerRegistry, Upsert};
pub use relay::RouteServerRouter;
pub use router::{Dispatch, Forward, RouteOutcome};
