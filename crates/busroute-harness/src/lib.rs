//! Deterministic simulation harness for busroute fabrics.
//!
//! Runs real route agent and route server drivers against in-memory links,
//! a virtual clock and a seeded RNG, so multi-node scenarios (zone fan-out,
//! route server restarts, leaf churn) are reproducible from a seed.
//!
//! # Components
//!
//! - [`SimEnv`]: virtual clock plus `ChaCha8` randomness
//! - [`SimFabric`]: agents, route servers and leaves wired by a FIFO queue

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fabric;
pub mod sim_env;

pub use fabric::{SimFabric, SimLeaf};
pub use sim_env::{SimEnv, SimInstant};
