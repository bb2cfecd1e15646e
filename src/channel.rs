// SPDX-License-Identifier: AGPL-3.0-or-later
//! Channel configuration, genesis block and join commands
//!
//! `config/configtx.yaml` is written with paths relative to its own
//! directory, since `configtxgen` resolves them from `FABRIC_CFG_PATH`.
//! Join commands run on the host against published ports, so they use
//! absolute paths and `localhost`.

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::info;

use crate::descriptor::{node_dir, Consenter, NetworkDescriptor, OrdererNode, Organization, PeerNode};
use crate::error::{Result, RoostError};
use crate::runtime::{CommandSpec, Toolchain};
use crate::template::{self, mapping};

/// Profile name passed to `configtxgen`
pub const PROFILE: &str = "ChannelUsingRaft";

const CONFIG_DIR: &str = "config";
const ARTIFACTS_DIR: &str = "channel-artifacts";

pub mod steps {
    pub const GENESIS: &str = "generate-genesis-block";
    pub const JOIN_ORDERER: &str = "join-orderer";
    pub const JOIN_PEER: &str = "join-peer";
}

/// Base-relative location of the channel's genesis block
pub fn block_path(desc: &NetworkDescriptor) -> PathBuf {
    Path::new(ARTIFACTS_DIR).join(format!("{}.block", desc.channel_name))
}

/// Base-relative location of the generated channel configuration
pub fn configtx_path() -> PathBuf {
    Path::new(CONFIG_DIR).join("configtx.yaml")
}

/// Fail before anything is written when genesis cannot succeed
pub fn require_orderers(desc: &NetworkDescriptor) -> Result<()> {
    if desc.orderers.is_empty() {
        return Err(RoostError::prerequisite(
            "no orderers configured - add at least one orderer first",
        ));
    }
    Ok(())
}

pub fn require_peers(desc: &NetworkDescriptor) -> Result<()> {
    if desc.peers.is_empty() {
        return Err(RoostError::prerequisite(
            "no peers configured - add at least one peer first",
        ));
    }
    Ok(())
}

fn node_org<'a>(desc: &'a NetworkDescriptor, org: &str, node: &str) -> Result<&'a Organization> {
    desc.org(org).ok_or_else(|| {
        RoostError::prerequisite(format!(
            "organization '{}' of node '{}' does not exist",
            org, node
        ))
    })
}

fn orderer_host(desc: &NetworkDescriptor, orderer: &OrdererNode) -> Result<String> {
    let org = node_org(desc, &orderer.org, &orderer.name)?;
    Ok(format!("{}.{}", orderer.name, org.domain))
}

/// `../<path>` as seen from the config directory
fn from_config_dir(path: &Path) -> String {
    Path::new("..").join(path).display().to_string()
}

/// Raft consenters, one per orderer in creation order
pub fn consenters(desc: &NetworkDescriptor) -> Result<Vec<Consenter>> {
    desc.orderers
        .iter()
        .map(|orderer| -> Result<Consenter> {
            let cert = node_dir(&orderer.msp_path).join("tls").join("server.crt");
            Ok(Consenter {
                host: orderer_host(desc, orderer)?,
                port: orderer.ports.main,
                client_tls_cert: cert.clone(),
                server_tls_cert: cert,
            })
        })
        .collect()
}

fn policy(kind: &str, rule: impl Into<String>) -> Value {
    mapping([("Type", kind.to_string()), ("Rule", rule.into())])
}

fn implicit_policies(extra: &[(&str, &str)]) -> Value {
    let mut entries = vec![
        ("Readers", policy("ImplicitMeta", "ANY Readers")),
        ("Writers", policy("ImplicitMeta", "ANY Writers")),
        ("Admins", policy("ImplicitMeta", "MAJORITY Admins")),
    ];
    entries.extend(extra.iter().map(|(name, rule)| (*name, policy("ImplicitMeta", *rule))));
    mapping(entries)
}

fn capabilities(names: &[String]) -> Value {
    mapping(names.iter().map(|n| (n.as_str(), true)))
}

fn org_section(desc: &NetworkDescriptor, org: &Organization) -> Result<Value> {
    let member = |role: &str| format!("OR('{}.{}')", org.msp_id, role);
    let mut section = mapping([
        ("Name", Value::from(org.msp_id.as_str())),
        ("ID", Value::from(org.msp_id.as_str())),
        ("MSPDir", Value::from(from_config_dir(&org.crypto_path.join("msp")))),
        (
            "Policies",
            mapping([
                ("Readers", policy("Signature", member("member"))),
                ("Writers", policy("Signature", member("member"))),
                ("Admins", policy("Signature", member("admin"))),
                ("Endorsement", policy("Signature", member("peer"))),
            ]),
        ),
    ]);

    let endpoints = desc
        .orderers
        .iter()
        .filter(|o| o.org == org.name)
        .map(|o| -> Result<Value> {
            Ok(Value::from(format!("{}:{}", orderer_host(desc, o)?, o.ports.main)))
        })
        .collect::<Result<Vec<_>>>()?;
    if !endpoints.is_empty() {
        template::set_path(&mut section, "OrdererEndpoints", Value::Sequence(endpoints));
    }

    if let Some(anchor) = desc.peers.iter().find(|p| p.org == org.name) {
        let anchors = Value::Sequence(vec![mapping([
            ("Host", Value::from(format!("{}.{}", anchor.name, org.domain))),
            ("Port", Value::from(u64::from(anchor.ports.main))),
        ])]);
        template::set_path(&mut section, "AnchorPeers", anchors);
    }
    Ok(section)
}

/// Assemble the channel configuration document over the base template
pub fn build_configtx(desc: &NetworkDescriptor, base: Option<&Path>) -> Result<Value> {
    require_orderers(desc)?;
    let channel = &desc.channel;

    let owns = |org: &Organization, peers: bool| {
        if peers {
            desc.peers.iter().any(|p| p.org == org.name)
        } else {
            desc.orderers.iter().any(|o| o.org == org.name)
        }
    };
    let mut orgs = Vec::new();
    let mut orderer_orgs = Vec::new();
    let mut peer_orgs = Vec::new();
    for org in desc.organizations.iter().filter(|o| o.is_ready()) {
        if !owns(org, true) && !owns(org, false) {
            continue;
        }
        let section = org_section(desc, org)?;
        if owns(org, false) {
            orderer_orgs.push(section.clone());
        }
        if owns(org, true) {
            peer_orgs.push(section.clone());
        }
        orgs.push(section);
    }

    let consenters = consenters(desc)?
        .into_iter()
        .map(|c| {
            mapping([
                ("Host", Value::from(c.host)),
                ("Port", Value::from(u64::from(c.port))),
                ("ClientTLSCert", Value::from(from_config_dir(&c.client_tls_cert))),
                ("ServerTLSCert", Value::from(from_config_dir(&c.server_tls_cert))),
            ])
        })
        .collect::<Vec<_>>();
    let addresses = consenters
        .iter()
        .filter_map(|c| {
            let host = template::get_path(c, "Host")?.as_str()?;
            let port = template::get_path(c, "Port")?.as_u64()?;
            Some(Value::from(format!("{}:{}", host, port)))
        })
        .collect::<Vec<_>>();

    let orderer = mapping([
        ("OrdererType", Value::from(channel.orderer_type.as_str())),
        ("Addresses", Value::Sequence(addresses)),
        ("BatchTimeout", Value::from(channel.batch_timeout.as_str())),
        (
            "BatchSize",
            mapping([
                ("MaxMessageCount", u64::from(channel.max_message_count)),
                ("AbsoluteMaxBytes", u64::from(channel.absolute_max_bytes)),
                ("PreferredMaxBytes", u64::from(channel.preferred_max_bytes)),
            ]),
        ),
        ("EtcdRaft", mapping([("Consenters", Value::Sequence(consenters))])),
        ("Policies", implicit_policies(&[("BlockValidation", "ANY Writers")])),
        ("Capabilities", capabilities(&channel.capabilities.orderer)),
    ]);
    let application = mapping([
        (
            "Policies",
            implicit_policies(&[
                ("LifecycleEndorsement", channel.policies.endorsement.as_str()),
                ("Endorsement", channel.policies.endorsement.as_str()),
            ]),
        ),
        ("Capabilities", capabilities(&channel.capabilities.application)),
    ]);

    let mut profile_orderer = orderer.clone();
    template::set_path(&mut profile_orderer, "Organizations", Value::Sequence(orderer_orgs));
    let mut profile_application = application.clone();
    template::set_path(&mut profile_application, "Organizations", Value::Sequence(peer_orgs));

    let overlay = mapping([
        ("Organizations", Value::Sequence(orgs)),
        (
            "Capabilities",
            mapping([
                ("Channel", capabilities(&channel.capabilities.channel)),
                ("Orderer", capabilities(&channel.capabilities.orderer)),
                ("Application", capabilities(&channel.capabilities.application)),
            ]),
        ),
        ("Application", application),
        ("Orderer", orderer),
        (
            "Channel",
            mapping([
                ("Policies", implicit_policies(&[])),
                ("Capabilities", capabilities(&channel.capabilities.channel)),
            ]),
        ),
        (
            "Profiles",
            mapping([(
                PROFILE,
                mapping([
                    ("Policies", implicit_policies(&[])),
                    ("Capabilities", capabilities(&channel.capabilities.channel)),
                    ("Orderer", profile_orderer),
                    ("Application", profile_application),
                ]),
            )]),
        ),
    ]);

    let mut doc = template::load_base(base, template::CONFIGTX_TEMPLATE)?;
    template::merge(&mut doc, overlay);
    Ok(doc)
}

/// Write `config/configtx.yaml`
pub fn write_configtx(desc: &NetworkDescriptor, base: Option<&Path>) -> Result<PathBuf> {
    let doc = build_configtx(desc, base)?;
    let path = desc.path(configtx_path());
    template::write_yaml(&path, &doc)?;
    info!(path = %path.display(), orderers = desc.orderers.len(), "Wrote channel configuration");
    Ok(path)
}

/// `configtxgen` invocation producing the genesis block
pub fn genesis_command(desc: &NetworkDescriptor, toolchain: &Toolchain) -> CommandSpec {
    let config_dir = desc.path(CONFIG_DIR);
    CommandSpec::new(steps::GENESIS, toolchain.program("configtxgen"))
        .args(["-profile", PROFILE, "-outputBlock"])
        .arg(desc.path(block_path(desc)).display().to_string())
        .args(["-channelID", desc.channel_name.as_str()])
        .current_dir(&config_dir)
        .env("FABRIC_CFG_PATH", config_dir.display().to_string())
}

/// `osnadmin channel join` against an orderer's admin endpoint
pub fn orderer_join_command(
    desc: &NetworkDescriptor,
    toolchain: &Toolchain,
    orderer: &OrdererNode,
    block: &Path,
) -> CommandSpec {
    let tls = desc.path(node_dir(&orderer.msp_path)).join("tls");
    let file = |name: &str| tls.join(name).display().to_string();
    CommandSpec::new(steps::JOIN_ORDERER, toolchain.program("osnadmin"))
        .args(["channel", "join", "--channelID", desc.channel_name.as_str()])
        .arg("--config-block")
        .arg(desc.path(block).display().to_string())
        .arg("-o")
        .arg(format!("localhost:{}", orderer.ports.secondary))
        .arg("--ca-file")
        .arg(file("ca.crt"))
        .arg("--client-cert")
        .arg(file("server.crt"))
        .arg("--client-key")
        .arg(file("server.key"))
}

/// `peer channel join` acting as the peer organization's admin
pub fn peer_join_command(
    desc: &NetworkDescriptor,
    toolchain: &Toolchain,
    peer: &PeerNode,
    block: &Path,
) -> Result<CommandSpec> {
    let org = node_org(desc, &peer.org, &peer.name)?;
    let admin_msp = org.admin.msp_path.as_ref().ok_or_else(|| {
        RoostError::prerequisite(format!(
            "organization '{}' has no enrolled admin to join '{}'",
            org.name, peer.name
        ))
    })?;
    let first_orderer = desc.orderers.first().ok_or_else(|| {
        RoostError::prerequisite("no orderers configured - add at least one orderer first")
    })?;
    let tls_root = desc.path(node_dir(&peer.msp_path)).join("tls").join("ca.crt");

    Ok(CommandSpec::new(steps::JOIN_PEER, toolchain.program("peer"))
        .args(["channel", "join", "-b"])
        .arg(desc.path(block).display().to_string())
        .arg("-o")
        .arg(format!("localhost:{}", first_orderer.ports.main))
        .env("FABRIC_CFG_PATH", desc.path(crate::artifacts::node_config_dir(&peer.name)).display().to_string())
        .env("CORE_PEER_TLS_ENABLED", peer.tls_enabled.to_string())
        .env("CORE_PEER_LOCALMSPID", peer.msp_id.as_str())
        .env("CORE_PEER_TLS_ROOTCERT_FILE", tls_root.display().to_string())
        .env("CORE_PEER_MSPCONFIGPATH", desc.path(admin_msp).display().to_string())
        .env("CORE_PEER_ADDRESS", format!("localhost:{}", peer.ports.main)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::node_msp_path;
    use crate::descriptor::tests::sample_org;
    use crate::descriptor::OrgKind;
    use crate::ports::{orderer_ports, peer_ports};

    fn descriptor(peers: usize, orderers: usize) -> NetworkDescriptor {
        let mut desc = NetworkDescriptor::new("/srv/net", "pm3", "pm3.org", "pm3");
        let mut org = sample_org("org1", OrgKind::Root, 9000);
        org.admin.msp_path = Some(PathBuf::from("organizations/client/org1/admin/msp"));
        for i in 0..peers {
            let name = format!("peer{}", i);
            desc.peers.push(PeerNode {
                msp_path: node_msp_path(&org, "peers", &name),
                name,
                org: org.name.clone(),
                ports: peer_ports(i).unwrap(),
                msp_id: org.msp_id.clone(),
                tls_enabled: true,
                gossip_bootstrap: None,
                joined: false,
            });
        }
        for i in 0..orderers {
            let name = format!("orderer{}", i);
            desc.orderers.push(OrdererNode {
                msp_path: node_msp_path(&org, "orderers", &name),
                name,
                org: org.name.clone(),
                ports: orderer_ports(i).unwrap(),
                msp_id: org.msp_id.clone(),
                tls_enabled: true,
                consensus: "etcdraft".to_string(),
                joined: false,
            });
        }
        desc.organizations.push(org);
        desc
    }

    #[test]
    fn test_genesis_requires_orderers() {
        let err = build_configtx(&descriptor(1, 0), None).unwrap_err();
        assert!(err.is_missing_prerequisite());
        assert!(err.to_string().contains("no orderers configured"));
        assert!(require_peers(&descriptor(0, 1)).unwrap_err().is_missing_prerequisite());
    }

    #[test]
    fn test_configtx_contents() {
        let doc = build_configtx(&descriptor(2, 2), None).unwrap();
        let consenters = template::get_path(&doc, "Orderer.EtcdRaft.Consenters")
            .and_then(Value::as_sequence)
            .unwrap();
        assert_eq!(consenters.len(), 2);
        assert_eq!(
            template::get_path(&consenters[1], "Host"),
            Some(&Value::from("orderer1.org1.pm3.org"))
        );
        assert_eq!(
            template::get_path(&consenters[0], "ClientTLSCert"),
            Some(&Value::from("../organizations/server/org1/orderers/orderer0.org1.pm3.org/tls/server.crt"))
        );

        let org = &template::get_path(&doc, "Organizations").and_then(Value::as_sequence).unwrap()[0];
        assert_eq!(template::get_path(org, "MSPDir"), Some(&Value::from("../organizations/server/org1/msp")));
        let anchor = &template::get_path(org, "AnchorPeers").and_then(Value::as_sequence).unwrap()[0];
        assert_eq!(template::get_path(anchor, "Host"), Some(&Value::from("peer0.org1.pm3.org")));

        assert!(template::get_path(&doc, "Profiles.ChannelUsingRaft.Orderer.Organizations").is_some());
        assert_eq!(
            template::get_path(&doc, "Capabilities.Application.V2_5"),
            Some(&Value::from(true))
        );
        // Base template values survive.
        assert!(template::get_path(&doc, "Orderer.EtcdRaft.Options.TickInterval").is_some());
    }

    #[test]
    fn test_genesis_command() {
        let desc = descriptor(1, 1);
        let spec = genesis_command(&desc, &Toolchain::default());
        assert_eq!(spec.program_name(), "configtxgen");
        assert!(spec.args.contains(&"/srv/net/channel-artifacts/pm3.block".to_string()));
        assert_eq!(spec.env_value("FABRIC_CFG_PATH"), Some("/srv/net/config"));
    }

    #[test]
    fn test_join_commands() {
        let desc = descriptor(1, 1);
        let block = block_path(&desc);
        let tc = Toolchain::new(Some(PathBuf::from("/opt/bin")));

        let orderer = orderer_join_command(&desc, &tc, &desc.orderers[0], &block);
        assert_eq!(orderer.program, PathBuf::from("/opt/bin/osnadmin"));
        assert!(orderer.args.contains(&"localhost:9200".to_string()));

        let peer = peer_join_command(&desc, &tc, &desc.peers[0], &block).unwrap();
        assert!(peer.args.contains(&"localhost:7100".to_string()));
        assert_eq!(peer.env_value("CORE_PEER_ADDRESS"), Some("localhost:7050"));
        assert_eq!(
            peer.env_value("CORE_PEER_MSPCONFIGPATH"),
            Some("/srv/net/organizations/client/org1/admin/msp")
        );
    }

    #[test]
    fn test_peer_join_needs_enrolled_admin() {
        let mut desc = descriptor(1, 1);
        desc.organizations[0].admin.msp_path = None;
        let block = block_path(&desc);
        let err = peer_join_command(&desc, &Toolchain::default(), &desc.peers[0], &block).unwrap_err();
        assert!(err.is_missing_prerequisite());
    }
}
