// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic port assignment
//!
//! Every published port in the network comes from this module. Each node
//! class owns a fixed, non-overlapping window of [`MAX_PER_CLASS`] ports,
//! so a port is a pure function of `(class, index)` and no two nodes can
//! ever collide.
//!
//! | class              | window      |
//! |--------------------|-------------|
//! | peer main          | 7050-7099   |
//! | orderer main       | 7100-7149   |
//! | peer chaincode     | 8100-8149   |
//! | certificate auth.  | 9000-9049   |
//! | peer operations    | 9050-9099   |
//! | orderer operations | 9150-9199   |
//! | orderer admin      | 9200-9249   |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoostError};

/// Nodes of one class that fit in its window
pub const MAX_PER_CLASS: usize = 50;

/// Port classes with their own window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortClass {
    PeerMain,
    PeerChaincode,
    PeerOperations,
    OrdererMain,
    OrdererAdmin,
    OrdererOperations,
    CertificateAuthority,
}

impl PortClass {
    pub const ALL: [PortClass; 7] = [
        PortClass::PeerMain,
        PortClass::PeerChaincode,
        PortClass::PeerOperations,
        PortClass::OrdererMain,
        PortClass::OrdererAdmin,
        PortClass::OrdererOperations,
        PortClass::CertificateAuthority,
    ];

    /// First port of the window
    pub const fn base(self) -> u16 {
        match self {
            PortClass::PeerMain => 7050,
            PortClass::OrdererMain => 7100,
            PortClass::PeerChaincode => 8100,
            PortClass::CertificateAuthority => 9000,
            PortClass::PeerOperations => 9050,
            PortClass::OrdererOperations => 9150,
            PortClass::OrdererAdmin => 9200,
        }
    }

    /// Last port of the window, inclusive
    pub const fn last(self) -> u16 {
        self.base() + MAX_PER_CLASS as u16 - 1
    }
}

impl fmt::Display for PortClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortClass::PeerMain => "peer",
            PortClass::PeerChaincode => "peer chaincode",
            PortClass::PeerOperations => "peer operations",
            PortClass::OrdererMain => "orderer",
            PortClass::OrdererAdmin => "orderer admin",
            PortClass::OrdererOperations => "orderer operations",
            PortClass::CertificateAuthority => "certificate authority",
        };
        f.write_str(name)
    }
}

/// Node kinds that are counted against a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Peer,
    Orderer,
    Organization,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Peer => f.write_str("peer"),
            NodeKind::Orderer => f.write_str("orderer"),
            NodeKind::Organization => f.write_str("organization"),
        }
    }
}

/// The three ports every peer or orderer publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePorts {
    /// Peer or orderer listen port
    pub main: u16,
    /// Chaincode port for peers, admin port for orderers
    pub secondary: u16,
    pub operations: u16,
}

/// Port for the `index`-th node of `class`
pub fn allocate_port(class: PortClass, index: usize) -> Result<u16> {
    if index >= MAX_PER_CLASS {
        return Err(RoostError::validation(format!(
            "{} index {} exceeds the maximum of {} nodes ({}-{})",
            class,
            index,
            MAX_PER_CLASS,
            class.base(),
            class.last()
        )));
    }
    Ok(class.base() + index as u16)
}

/// All three ports of the `index`-th peer
pub fn peer_ports(index: usize) -> Result<NodePorts> {
    Ok(NodePorts {
        main: allocate_port(PortClass::PeerMain, index)?,
        secondary: allocate_port(PortClass::PeerChaincode, index)?,
        operations: allocate_port(PortClass::PeerOperations, index)?,
    })
}

/// All three ports of the `index`-th orderer
pub fn orderer_ports(index: usize) -> Result<NodePorts> {
    Ok(NodePorts {
        main: allocate_port(PortClass::OrdererMain, index)?,
        secondary: allocate_port(PortClass::OrdererAdmin, index)?,
        operations: allocate_port(PortClass::OrdererOperations, index)?,
    })
}

/// Reject a batch before anything is created
///
/// `existing` is the current collection length; the batch would occupy
/// indices `existing..existing + count`.
pub fn validate_count(kind: NodeKind, existing: usize, count: usize) -> Result<()> {
    if count == 0 {
        return Err(RoostError::validation(format!(
            "{} count must be at least 1",
            kind
        )));
    }
    let total = existing.saturating_add(count);
    if total > MAX_PER_CLASS {
        return Err(RoostError::validation(format!(
            "cannot add {} {}(s): {} already exist and the maximum is {}",
            count, kind, existing, MAX_PER_CLASS
        )));
    }
    Ok(())
}
