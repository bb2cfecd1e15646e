// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kea-Roost: lifecycle orchestrator for permissioned ledger networks
//!
//! The Roost is where the Flock's ledger is hatched. It stands up the
//! certificate authority hierarchy, enrolls organizations and nodes,
//! generates the container topology and forms the channel, one ordered
//! step at a time.
//!
//! # Features
//!
//! * **Ordered bring-up:** every step consumes a certificate, socket or file
//!   the previous step produced, and waits for it with a bounded poll
//! * **Resumable:** progress lives in `stack.json`; a failed organization or
//!   a half-joined channel is picked up again on the next run
//! * **Deterministic ports:** each node class owns a fixed, disjoint range

pub mod artifacts;
pub mod channel;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod logging;
pub mod network;
pub mod ports;
pub mod readiness;
pub mod runtime;
pub mod template;
pub mod topology;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use descriptor::{NetworkDescriptor, NetworkState};
pub use error::{Result, RoostError};
pub use network::{InitRequest, Network, OrgRequest};
