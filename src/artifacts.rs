// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-node artifacts: MSP directory layout and runtime configuration
//!
//! Node configs are written to `config/<node>/` under the base path and
//! mounted read-only into the node container, so every address in them is
//! the in-container address.

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::{debug, info};

use crate::descriptor::{NetworkDescriptor, OrdererNode, Organization, PeerNode};
use crate::error::{Result, RoostError};
use crate::identity::CA_CERT_FILE;
use crate::template::{self, mapping};

/// Subdirectories of an MSP and whether they hold secrets
const MSP_LAYOUT: [(&str, bool); 6] = [
    ("signcerts", false),
    ("keystore", true),
    ("cacerts", false),
    ("tlscacerts", false),
    ("admincerts", false),
    ("tls", true),
];

/// In-container mount points
pub const PEER_CONFIG_MOUNT: &str = "/etc/hyperledger/peercfg";
pub const PEER_NODE_MOUNT: &str = "/etc/hyperledger/fabric";
pub const ORDERER_CONFIG_MOUNT: &str = "/etc/hyperledger/orderercfg";
pub const ORDERER_NODE_MOUNT: &str = "/var/hyperledger/orderer";

/// Node config directory, relative to the base path
pub fn node_config_dir(node: &str) -> PathBuf {
    Path::new("config").join(node)
}

/// Base-relative MSP path for a node of `org`
pub fn node_msp_path(org: &Organization, kind: &str, node: &str) -> PathBuf {
    org.crypto_path
        .join(kind)
        .join(format!("{}.{}", node, org.domain))
        .join("msp")
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// NodeOU classification pointing every role at the organization CA cert
fn node_ou_config() -> Value {
    let ou = |identifier: &str| {
        mapping([
            ("Certificate", "cacerts/ca-cert.pem"),
            ("OrganizationalUnitIdentifier", identifier),
        ])
    };
    mapping([(
        "NodeOUs",
        mapping([
            ("Enable", Value::from(true)),
            ("ClientOUIdentifier", ou("client")),
            ("PeerOUIdentifier", ou("peer")),
            ("AdminOUIdentifier", ou("admin")),
            ("OrdererOUIdentifier", ou("orderer")),
        ]),
    )])
}

/// Create the MSP skeleton for a node
///
/// Existing certificates and keys are left in place, so regenerating a
/// node's artifacts never discards issued material.
pub fn create_msp(desc: &NetworkDescriptor, org: &Organization, msp_path: &Path) -> Result<()> {
    let msp = desc.path(msp_path);
    debug!(path = %msp.display(), "Creating MSP layout");

    for (name, secret) in MSP_LAYOUT {
        let dir = msp.join(name);
        std::fs::create_dir_all(&dir)?;
        set_mode(&dir, if secret { 0o700 } else { 0o755 })?;
    }

    let ca_cert = desc.path(&org.crypto_path).join(CA_CERT_FILE);
    let target = msp.join("cacerts").join(CA_CERT_FILE);
    if ca_cert.exists() && !target.exists() {
        std::fs::copy(&ca_cert, &target)?;
    }

    let config = msp.join("config.yaml");
    std::fs::write(&config, serde_yaml::to_string(&node_ou_config())?)?;
    set_mode(&config, 0o644)?;
    Ok(())
}

fn lookup_org<'a>(desc: &'a NetworkDescriptor, name: &str, node: &str) -> Result<&'a Organization> {
    desc.org(name).ok_or_else(|| {
        RoostError::prerequisite(format!(
            "organization '{}' of node '{}' does not exist",
            name, node
        ))
    })
}

fn write_node_config(desc: &NetworkDescriptor, node: &str, file: &str, doc: &Value) -> Result<PathBuf> {
    let path = desc.path(node_config_dir(node)).join(file);
    template::write_yaml(&path, doc)?;
    set_mode(&path, 0o640)?;
    info!(node = %node, path = %path.display(), "Wrote node configuration");
    Ok(path)
}

/// Render `config/<peer>/core.yaml`
pub fn write_peer_config(desc: &NetworkDescriptor, peer: &PeerNode, base: Option<&Path>) -> Result<PathBuf> {
    lookup_org(desc, &peer.org, &peer.name)?;
    let mut doc = template::load_base(base, template::CORE_TEMPLATE)?;

    let address = format!("{}:{}", peer.name, peer.ports.main);
    let gossip_bootstrap = peer.gossip_bootstrap.clone().unwrap_or_else(|| address.clone());
    let tls = |file: &str| format!("{}/tls/{}", PEER_NODE_MOUNT, file);

    let overlay = mapping([
        (
            "peer",
            mapping([
                ("id", Value::from(peer.name.as_str())),
                ("networkId", Value::from(desc.network_name.as_str())),
                ("listenAddress", Value::from(format!("0.0.0.0:{}", peer.ports.main))),
                ("address", Value::from(address.as_str())),
                ("chaincodeListenAddress", Value::from(format!("0.0.0.0:{}", peer.ports.secondary))),
                ("chaincodeAddress", Value::from(format!("{}:{}", peer.name, peer.ports.secondary))),
                (
                    "gossip",
                    mapping([
                        ("bootstrap", gossip_bootstrap.as_str()),
                        ("endpoint", address.as_str()),
                        ("externalEndpoint", address.as_str()),
                    ]),
                ),
                (
                    "tls",
                    mapping([
                        ("enabled", Value::from(peer.tls_enabled)),
                        ("cert", mapping([("file", tls("server.crt"))])),
                        ("key", mapping([("file", tls("server.key"))])),
                        ("rootcert", mapping([("file", tls("ca.crt"))])),
                    ]),
                ),
                ("mspConfigPath", Value::from(format!("{}/msp", PEER_NODE_MOUNT))),
                ("localMspId", Value::from(peer.msp_id.as_str())),
            ]),
        ),
        (
            "vm",
            mapping([(
                "docker",
                mapping([("hostConfig", mapping([("NetworkMode", desc.network_name.as_str())]))]),
            )]),
        ),
        (
            "operations",
            mapping([("listenAddress", format!("0.0.0.0:{}", peer.ports.operations))]),
        ),
    ]);
    template::merge(&mut doc, overlay);
    write_node_config(desc, &peer.name, "core.yaml", &doc)
}

/// Render `config/<orderer>/orderer.yaml`
pub fn write_orderer_config(
    desc: &NetworkDescriptor,
    orderer: &OrdererNode,
    base: Option<&Path>,
) -> Result<PathBuf> {
    lookup_org(desc, &orderer.org, &orderer.name)?;
    let mut doc = template::load_base(base, template::ORDERER_TEMPLATE)?;

    let tls = |file: &str| format!("{}/tls/{}", ORDERER_NODE_MOUNT, file);
    let root_cas = || Value::Sequence(vec![Value::from(tls("ca.crt"))]);

    let overlay = mapping([
        (
            "General",
            mapping([
                ("ListenAddress", Value::from("0.0.0.0")),
                ("ListenPort", Value::from(u64::from(orderer.ports.main))),
                ("LocalMSPID", Value::from(orderer.msp_id.as_str())),
                ("LocalMSPDir", Value::from(format!("{}/msp", ORDERER_NODE_MOUNT))),
                ("BootstrapMethod", Value::from("none")),
                (
                    "TLS",
                    mapping([
                        ("Enabled", Value::from(orderer.tls_enabled)),
                        ("PrivateKey", Value::from(tls("server.key"))),
                        ("Certificate", Value::from(tls("server.crt"))),
                        ("RootCAs", root_cas()),
                    ]),
                ),
                (
                    "Cluster",
                    mapping([
                        ("ClientCertificate", Value::from(tls("server.crt"))),
                        ("ClientPrivateKey", Value::from(tls("server.key"))),
                        ("RootCAs", root_cas()),
                    ]),
                ),
            ]),
        ),
        (
            "Operations",
            mapping([("ListenAddress", format!("0.0.0.0:{}", orderer.ports.operations))]),
        ),
        (
            "Admin",
            mapping([
                ("ListenAddress", Value::from(format!("0.0.0.0:{}", orderer.ports.secondary))),
                (
                    "TLS",
                    mapping([
                        ("Enabled", Value::from(true)),
                        ("Certificate", Value::from(tls("server.crt"))),
                        ("PrivateKey", Value::from(tls("server.key"))),
                        ("RootCAs", root_cas()),
                        ("ClientAuthRequired", Value::from(true)),
                        ("ClientRootCAs", root_cas()),
                    ]),
                ),
            ]),
        ),
        ("ChannelParticipation", mapping([("Enabled", true)])),
    ]);
    template::merge(&mut doc, overlay);
    write_node_config(desc, &orderer.name, "orderer.yaml", &doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::sample_org;
    use crate::descriptor::OrgKind;
    use crate::ports::{orderer_ports, peer_ports};
    use tempfile::tempdir;

    fn setup(base: &Path) -> (NetworkDescriptor, PeerNode, OrdererNode) {
        let mut desc = NetworkDescriptor::new(base, "pm3", "pm3.org", "pm3");
        let org = sample_org("org1", OrgKind::Root, 9000);
        let peer = PeerNode {
            name: "peer1".to_string(),
            org: "org1".to_string(),
            ports: peer_ports(1).unwrap(),
            msp_path: node_msp_path(&org, "peers", "peer1"),
            msp_id: org.msp_id.clone(),
            tls_enabled: true,
            gossip_bootstrap: Some("peer0.org1.pm3.org:7050".to_string()),
            joined: false,
        };
        let orderer = OrdererNode {
            name: "orderer0".to_string(),
            org: "org1".to_string(),
            ports: orderer_ports(0).unwrap(),
            msp_path: node_msp_path(&org, "orderers", "orderer0"),
            msp_id: org.msp_id.clone(),
            tls_enabled: true,
            consensus: "etcdraft".to_string(),
            joined: false,
        };
        desc.organizations.push(org);
        (desc, peer, orderer)
    }

    #[test]
    fn test_msp_layout_and_permissions() {
        let dir = tempdir().unwrap();
        let (desc, peer, _) = setup(dir.path());
        let org = desc.org("org1").unwrap().clone();
        std::fs::create_dir_all(desc.path(&org.crypto_path)).unwrap();
        std::fs::write(desc.path(&org.crypto_path).join(CA_CERT_FILE), "CA").unwrap();

        create_msp(&desc, &org, &peer.msp_path).unwrap();
        let msp = desc.path(&peer.msp_path);
        for (name, _) in MSP_LAYOUT {
            assert!(msp.join(name).is_dir(), "{} missing", name);
        }
        assert!(msp.join("cacerts").join(CA_CERT_FILE).exists());

        let config = template::read_yaml(&msp.join("config.yaml")).unwrap();
        assert_eq!(
            template::get_path(&config, "NodeOUs.PeerOUIdentifier.OrganizationalUnitIdentifier"),
            Some(&Value::from("peer"))
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(msp.join("keystore")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn test_msp_keeps_issued_material() {
        let dir = tempdir().unwrap();
        let (desc, peer, _) = setup(dir.path());
        let org = desc.org("org1").unwrap().clone();
        create_msp(&desc, &org, &peer.msp_path).unwrap();
        let key = desc.path(&peer.msp_path).join("keystore/key.pem");
        std::fs::write(&key, "SECRET").unwrap();

        create_msp(&desc, &org, &peer.msp_path).unwrap();
        assert_eq!(std::fs::read_to_string(&key).unwrap(), "SECRET");
    }

    #[test]
    fn test_peer_config_overlay() {
        let dir = tempdir().unwrap();
        let (desc, peer, _) = setup(dir.path());
        let path = write_peer_config(&desc, &peer, None).unwrap();
        assert!(path.ends_with("config/peer1/core.yaml"));

        let doc = template::read_yaml(&path).unwrap();
        assert_eq!(template::get_path(&doc, "peer.listenAddress"), Some(&Value::from("0.0.0.0:7051")));
        assert_eq!(
            template::get_path(&doc, "peer.gossip.bootstrap"),
            Some(&Value::from("peer0.org1.pm3.org:7050"))
        );
        assert_eq!(template::get_path(&doc, "operations.listenAddress"), Some(&Value::from("0.0.0.0:9051")));
        // Base template keys survive the merge.
        assert!(template::get_path(&doc, "ledger.state.stateDatabase").is_some());
    }

    #[test]
    fn test_orderer_config_overlay() {
        let dir = tempdir().unwrap();
        let (desc, _, orderer) = setup(dir.path());
        let path = write_orderer_config(&desc, &orderer, None).unwrap();
        let doc = template::read_yaml(&path).unwrap();
        assert_eq!(template::get_path(&doc, "General.ListenPort"), Some(&Value::from(7100u64)));
        assert_eq!(template::get_path(&doc, "Admin.ListenAddress"), Some(&Value::from("0.0.0.0:9200")));
        assert_eq!(template::get_path(&doc, "General.LocalMSPID"), Some(&Value::from("org1-msp")));
    }

    #[test]
    fn test_unknown_org_rejected() {
        let dir = tempdir().unwrap();
        let (desc, mut peer, _) = setup(dir.path());
        peer.org = "ghost".to_string();
        let err = write_peer_config(&desc, &peer, None).unwrap_err();
        assert!(err.is_missing_prerequisite());
    }
}
