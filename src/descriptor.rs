// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted network descriptor
//!
//! `stack.json` under the base path is the single durable record of what
//! exists. Every mutating operation rewrites it wholesale, so a crash leaves
//! either the previous or the next complete record on disk.
//!
//! Paths stored here are relative to the base path. [`NetworkDescriptor::path`]
//! turns them into usable filesystem paths.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RoostError};
use crate::ports::NodePorts;

/// File name of the descriptor inside the base path
pub const DESCRIPTOR_FILE: &str = "stack.json";

/// How far network bring-up has progressed
///
/// States are totally ordered; an operation that needs a state accepts any
/// later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    Uninitialized,
    RootAuthorityReady,
    OrganizationsReady,
    TopologyGenerated,
    ContainersRunning,
    ChannelArtifactsGenerated,
    ChannelFormed,
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkState::Uninitialized => "uninitialized",
            NetworkState::RootAuthorityReady => "root authority ready",
            NetworkState::OrganizationsReady => "organizations ready",
            NetworkState::TopologyGenerated => "topology generated",
            NetworkState::ContainersRunning => "containers running",
            NetworkState::ChannelArtifactsGenerated => "channel artifacts generated",
            NetworkState::ChannelFormed => "channel formed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgKind {
    /// The TLS root authority that issues every organization's bootstrap identity
    Root,
    Member,
}

/// Enrollment progress of one organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrgStatus {
    Pending,
    Ready,
    Failed { step: String },
}

/// CA constraint inside a signing profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaConstraint {
    pub is_ca: bool,
    pub max_path_len: u32,
    pub max_path_len_zero: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningProfile {
    pub usage: Vec<String>,
    pub expiry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_constraint: Option<CaConstraint>,
}

/// Everything needed to reach and describe an organization's authority
///
/// The admin password is deliberately absent; see
/// [`crate::identity::admin_password`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAuthority {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub admin_user: String,
    pub tls_enabled: bool,
    #[serde(default)]
    pub signing_profiles: BTreeMap<String, SigningProfile>,
    #[serde(default)]
    pub affiliations: BTreeMap<String, Vec<String>>,
}

impl CertificateAuthority {
    /// `https://host:port` or `http://host:port`
    pub fn url(&self) -> String {
        let scheme = if self.tls_enabled { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// An enrolled identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub affiliation: String,
    /// MSP directory relative to the base path, once enrolled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msp_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    pub domain: String,
    pub msp_id: String,
    pub kind: OrgKind,
    pub status: OrgStatus,
    /// Authority server directory, relative to the base path
    pub crypto_path: PathBuf,
    /// Prefix of the bootstrap credentials issued by the root authority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_id: Option<String>,
    pub ca: CertificateAuthority,
    pub admin: Identity,
    #[serde(default)]
    pub identities: Vec<Identity>,
}

impl Organization {
    pub fn is_ready(&self) -> bool {
        self.status == OrgStatus::Ready
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, OrgStatus::Failed { .. })
    }

    /// Compose service name of this organization's authority
    pub fn ca_service(&self) -> String {
        format!("{}_ca", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNode {
    pub name: String,
    pub org: String,
    pub ports: NodePorts,
    /// Relative to the base path
    pub msp_path: PathBuf,
    pub msp_id: String,
    pub tls_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gossip_bootstrap: Option<String>,
    #[serde(default)]
    pub joined: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdererNode {
    pub name: String,
    pub org: String,
    pub ports: NodePorts,
    /// Relative to the base path
    pub msp_path: PathBuf,
    pub msp_id: String,
    pub tls_enabled: bool,
    pub consensus: String,
    #[serde(default)]
    pub joined: bool,
}

/// Node directory (parent of `msp/` and `tls/`)
pub fn node_dir(msp_path: &Path) -> PathBuf {
    msp_path.parent().map(Path::to_path_buf).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub channel: Vec<String>,
    pub orderer: Vec<String>,
    pub application: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policies {
    pub readers: String,
    pub writers: String,
    pub admins: String,
    pub endorsement: String,
}

/// One raft consenter, fixed at genesis time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consenter {
    pub host: String,
    pub port: u16,
    pub client_tls_cert: PathBuf,
    pub server_tls_cert: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub name: String,
    pub orderer_type: String,
    pub batch_timeout: String,
    pub max_message_count: u32,
    pub absolute_max_bytes: u32,
    pub preferred_max_bytes: u32,
    pub capabilities: Capabilities,
    pub policies: Policies,
    #[serde(default)]
    pub consenters: Vec<Consenter>,
    /// Relative to the base path, once generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genesis_block: Option<PathBuf>,
}

impl ChannelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            orderer_type: "etcdraft".to_string(),
            batch_timeout: "2s".to_string(),
            max_message_count: 10,
            absolute_max_bytes: 103_809_024,
            preferred_max_bytes: 524_288,
            capabilities: Capabilities {
                channel: vec!["V2_0".to_string()],
                orderer: vec!["V2_0".to_string()],
                application: vec!["V2_5".to_string()],
            },
            policies: Policies {
                readers: "ANY Readers".to_string(),
                writers: "ANY Writers".to_string(),
                admins: "MAJORITY Admins".to_string(),
                endorsement: "MAJORITY Endorsement".to_string(),
            },
            consenters: Vec::new(),
            genesis_block: None,
        }
    }
}

/// Root aggregate persisted as `stack.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    /// Rewritten on load to wherever the file was actually found
    pub base_path: PathBuf,
    pub network_name: String,
    pub domain: String,
    pub channel_name: String,
    pub state: NetworkState,
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub peers: Vec<PeerNode>,
    #[serde(default)]
    pub orderers: Vec<OrdererNode>,
    pub channel: ChannelDescriptor,
}

impl NetworkDescriptor {
    pub fn new(
        base_path: impl Into<PathBuf>,
        network_name: impl Into<String>,
        domain: impl Into<String>,
        channel_name: impl Into<String>,
    ) -> Self {
        let channel_name = channel_name.into();
        Self {
            base_path: base_path.into(),
            network_name: network_name.into(),
            domain: domain.into(),
            channel: ChannelDescriptor::new(channel_name.clone()),
            channel_name,
            state: NetworkState::Uninitialized,
            organizations: Vec::new(),
            peers: Vec::new(),
            orderers: Vec::new(),
        }
    }

    /// Location of `stack.json` for a base path
    pub fn file_path(base_path: &Path) -> PathBuf {
        base_path.join(DESCRIPTOR_FILE)
    }

    /// Load the descriptor stored under `base_path`
    pub fn load(base_path: &Path) -> Result<Self> {
        let path = Self::file_path(base_path);
        if !path.exists() {
            return Err(RoostError::DescriptorNotFound { path });
        }
        let contents = std::fs::read_to_string(&path)?;
        let mut descriptor: NetworkDescriptor = serde_json::from_str(&contents)?;
        descriptor.base_path = base_path.to_path_buf();
        debug!(path = %path.display(), state = %descriptor.state, "Loaded network descriptor");
        Ok(descriptor)
    }

    /// Replace `stack.json` with the current record
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_path)?;
        let path = Self::file_path(&self.base_path);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), state = %self.state, "Saved network descriptor");
        Ok(())
    }

    /// Resolve a base-relative path
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.base_path.join(relative)
    }

    /// Fail unless bring-up has reached `required`
    pub fn require_state(&self, required: NetworkState, what: &str) -> Result<()> {
        if self.state < required {
            let hint = if self.state == NetworkState::Uninitialized {
                "; re-run init to finish the root authority"
            } else {
                ""
            };
            return Err(RoostError::prerequisite(format!(
                "{} requires the network to be at least '{}' (currently '{}'){}",
                what, required, self.state, hint
            )));
        }
        Ok(())
    }

    /// Move forward to `state`; never moves backwards
    pub fn advance(&mut self, state: NetworkState) {
        if state > self.state {
            self.state = state;
        }
    }

    /// Record that nodes or organizations changed after the topology was built
    pub fn mark_structural_change(&mut self) {
        if self.state > NetworkState::OrganizationsReady {
            self.state = NetworkState::OrganizationsReady;
        }
    }

    /// Record that the containers are no longer running
    pub fn containers_stopped(&mut self) {
        if self.state >= NetworkState::ContainersRunning {
            self.state = NetworkState::TopologyGenerated;
        }
    }

    pub fn root_org(&self) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.kind == OrgKind::Root)
    }

    pub fn org(&self, name: &str) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.name == name)
    }

    pub fn org_mut(&mut self, name: &str) -> Option<&mut Organization> {
        self.organizations.iter_mut().find(|o| o.name == name)
    }

    /// Organization a node would belong to when none is named
    pub fn default_node_org(&self) -> Option<&Organization> {
        self.root_org()
    }

    /// Whether any node has already joined the channel
    pub fn channel_has_members(&self) -> bool {
        self.peers.iter().any(|p| p.joined) || self.orderers.iter().any(|o| o.joined)
    }

    /// Human-readable overview of the network
    pub fn summary(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();
        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(out, "FABRIC NETWORK CONFIGURATION SUMMARY");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "\nState: {}", self.state);

        if let Some(root) = self.root_org() {
            let _ = writeln!(out, "\nRoot Organization:");
            let _ = writeln!(out, "  Name:   {}", root.name);
            let _ = writeln!(out, "  MSPID:  {}", root.msp_id);
            let _ = writeln!(out, "  Domain: {}", root.domain);
            let _ = writeln!(out, "  CA:     {}:{}", root.ca.host, root.ca.port);
        }

        let members: Vec<_> = self
            .organizations
            .iter()
            .filter(|o| o.kind == OrgKind::Member)
            .collect();
        if !members.is_empty() {
            let _ = writeln!(out, "\nOrganizations ({}):", members.len());
            for org in members {
                let status = match &org.status {
                    OrgStatus::Ready => "ready".to_string(),
                    OrgStatus::Pending => "pending".to_string(),
                    OrgStatus::Failed { step } => format!("failed at {}", step),
                };
                let _ = writeln!(
                    out,
                    "  - {} ({}, CA: {}:{}, {})",
                    org.name, org.domain, org.ca.host, org.ca.port, status
                );
            }
        }

        let _ = writeln!(out, "\nChannel:");
        let _ = writeln!(out, "  Name:         {}", self.channel_name);
        let _ = writeln!(out, "  Orderer Type: {}", self.channel.orderer_type);

        if !self.orderers.is_empty() {
            let _ = writeln!(out, "\nOrderers ({}):", self.orderers.len());
            for ord in &self.orderers {
                let _ = writeln!(
                    out,
                    "  - {} (port: {}, admin: {}, ops: {})",
                    ord.name, ord.ports.main, ord.ports.secondary, ord.ports.operations
                );
            }
        }

        if !self.peers.is_empty() {
            let _ = writeln!(out, "\nPeers ({}):", self.peers.len());
            for p in &self.peers {
                let _ = writeln!(
                    out,
                    "  - {} (port: {}, chaincode: {}, ops: {})",
                    p.name, p.ports.main, p.ports.secondary, p.ports.operations
                );
            }
        }

        let _ = writeln!(out, "\n{}", rule);
        out
    }
}
