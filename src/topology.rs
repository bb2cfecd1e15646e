// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container topology generation
//!
//! The compose file is a pure function of the descriptor and is rebuilt in
//! full after every structural change. Host paths are written relative to
//! the base path, where the compose file lives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifacts::{
    node_config_dir, ORDERER_CONFIG_MOUNT, ORDERER_NODE_MOUNT, PEER_CONFIG_MOUNT, PEER_NODE_MOUNT,
};
use crate::config::ImagesConfig;
use crate::descriptor::{node_dir, NetworkDescriptor, OrdererNode, Organization, PeerNode};
use crate::error::Result;

/// File name of the compose file inside the base path
pub const COMPOSE_FILE: &str = "docker-compose.yml";

const CA_HOME: &str = "/etc/hyperledger/fabric-ca-server";

/// What a service waits for before compose starts it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDependency {
    None,
    Started(String),
    Healthy(String),
}

/// Logical node to container mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    pub node: String,
    pub service: String,
    pub volume: String,
    pub dependency: StartDependency,
}

/// Service name of a peer or orderer
pub fn node_service(desc: &NetworkDescriptor, node: &str) -> String {
    format!("{}_{}", desc.network_name, node)
}

/// Bindings for every service the descriptor implies, authorities first
pub fn plan(desc: &NetworkDescriptor) -> Vec<ServiceBinding> {
    let mut bindings = Vec::new();

    for org in desc.organizations.iter().filter(|o| !o.is_failed()) {
        bindings.push(ServiceBinding {
            node: org.name.clone(),
            service: org.ca_service(),
            volume: org.ca_service(),
            dependency: StartDependency::None,
        });
    }

    let ca_of = |org_name: &str| {
        desc.org(org_name)
            .filter(|o| !o.is_failed())
            .map(|o| StartDependency::Healthy(o.ca_service()))
            .unwrap_or(StartDependency::None)
    };

    for orderer in &desc.orderers {
        let service = node_service(desc, &orderer.name);
        bindings.push(ServiceBinding {
            node: orderer.name.clone(),
            volume: service.clone(),
            service,
            dependency: ca_of(&orderer.org),
        });
    }

    let first_orderer = desc.orderers.first().map(|o| node_service(desc, &o.name));
    for peer in &desc.peers {
        let service = node_service(desc, &peer.name);
        let dependency = match &first_orderer {
            Some(orderer) => StartDependency::Started(orderer.clone()),
            None => ca_of(&peer.org),
        };
        bindings.push(ServiceBinding {
            node: peer.name.clone(),
            volume: service.clone(),
            service,
            dependency,
        });
    }

    bindings
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub networks: BTreeMap<String, NetworkDef>,
    pub services: BTreeMap<String, Service>,
    pub volumes: BTreeMap<String, VolumeDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDef {
    pub name: String,
    pub driver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub container_name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub command: Vec<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub depends_on: BTreeMap<String, DependsOn>,
    pub logging: Logging,
    pub restart: String,
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependsOn {
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    pub start_period: String,
}

impl HealthCheck {
    fn shell(command: String, interval: &str, timeout: &str) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), command],
            interval: interval.to_string(),
            timeout: timeout.to_string(),
            retries: 5,
            start_period: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logging {
    pub driver: String,
    pub options: BTreeMap<String, String>,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            driver: "json-file".to_string(),
            options: BTreeMap::from([
                ("max-size".to_string(), "10m".to_string()),
                ("max-file".to_string(), "3".to_string()),
            ]),
        }
    }
}

/// `./relative` form compose resolves against the project directory
fn relative_mount(host: &Path, container: &str, read_only: bool) -> String {
    let mut mount = format!("./{}:{}", host.display(), container);
    if read_only {
        mount.push_str(":ro");
    }
    mount
}

fn port_mapping(port: u16) -> String {
    format!("{}:{}", port, port)
}

fn env<const N: usize>(entries: [(&str, String); N]) -> BTreeMap<String, String> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn depends_on(dependency: &StartDependency) -> BTreeMap<String, DependsOn> {
    let (service, condition) = match dependency {
        StartDependency::None => return BTreeMap::new(),
        StartDependency::Started(s) => (s, "service_started"),
        StartDependency::Healthy(s) => (s, "service_healthy"),
    };
    BTreeMap::from([(
        service.clone(),
        DependsOn {
            condition: condition.to_string(),
        },
    )])
}

fn ca_service(desc: &NetworkDescriptor, org: &Organization, image: &str) -> Service {
    let probe = if org.ca.tls_enabled {
        format!(
            "fabric-ca-client getcainfo -u https://localhost:{} --caname {} --tls.certfiles {}/ca-cert.pem",
            org.ca.port, org.ca.name, CA_HOME
        )
    } else {
        format!(
            "fabric-ca-client getcainfo -u http://localhost:{} --caname {}",
            org.ca.port, org.ca.name
        )
    };

    Service {
        container_name: format!("{}_fabric_ca", org.name),
        image: image.to_string(),
        hostname: None,
        environment: env([
            ("FABRIC_CA_HOME", CA_HOME.to_string()),
            ("FABRIC_CA_SERVER_DEBUG", "false".to_string()),
        ]),
        working_dir: None,
        command: vec!["sh".to_string(), "-c".to_string(), "fabric-ca-server start".to_string()],
        ports: vec![port_mapping(org.ca.port)],
        volumes: vec![relative_mount(&org.crypto_path, CA_HOME, false)],
        healthcheck: Some(HealthCheck::shell(probe, "10s", "5s")),
        depends_on: BTreeMap::new(),
        logging: Logging::default(),
        restart: "unless-stopped".to_string(),
        networks: vec![desc.network_name.clone()],
    }
}

fn orderer_service(
    desc: &NetworkDescriptor,
    orderer: &OrdererNode,
    domain: &str,
    image: &str,
    dependency: &StartDependency,
) -> Service {
    let node = node_dir(&orderer.msp_path);
    let data = node.join("data");
    let tls = |file: &str| format!("{}/tls/{}", ORDERER_NODE_MOUNT, file);
    let ports = orderer.ports;

    Service {
        container_name: node_service(desc, &orderer.name),
        image: image.to_string(),
        hostname: Some(format!("{}.{}", orderer.name, domain)),
        environment: env([
            ("FABRIC_CFG_PATH", ORDERER_CONFIG_MOUNT.to_string()),
            ("FABRIC_LOGGING_SPEC", "INFO".to_string()),
            ("ORDERER_GENERAL_LISTENADDRESS", "0.0.0.0".to_string()),
            ("ORDERER_GENERAL_LISTENPORT", ports.main.to_string()),
            ("ORDERER_GENERAL_LOCALMSPID", orderer.msp_id.clone()),
            ("ORDERER_GENERAL_LOCALMSPDIR", format!("{}/msp", ORDERER_NODE_MOUNT)),
            ("ORDERER_GENERAL_BOOTSTRAPMETHOD", "none".to_string()),
            ("ORDERER_CHANNELPARTICIPATION_ENABLED", "true".to_string()),
            ("ORDERER_GENERAL_TLS_ENABLED", orderer.tls_enabled.to_string()),
            ("ORDERER_GENERAL_TLS_PRIVATEKEY", tls("server.key")),
            ("ORDERER_GENERAL_TLS_CERTIFICATE", tls("server.crt")),
            ("ORDERER_GENERAL_TLS_ROOTCAS", format!("[{}]", tls("ca.crt"))),
            ("ORDERER_GENERAL_CLUSTER_CLIENTCERTIFICATE", tls("server.crt")),
            ("ORDERER_GENERAL_CLUSTER_CLIENTPRIVATEKEY", tls("server.key")),
            ("ORDERER_GENERAL_CLUSTER_ROOTCAS", format!("[{}]", tls("ca.crt"))),
            ("ORDERER_OPERATIONS_LISTENADDRESS", format!("0.0.0.0:{}", ports.operations)),
            ("ORDERER_METRICS_PROVIDER", "disabled".to_string()),
            ("ORDERER_ADMIN_LISTENADDRESS", format!("0.0.0.0:{}", ports.secondary)),
            ("ORDERER_ADMIN_TLS_ENABLED", "true".to_string()),
            ("ORDERER_ADMIN_TLS_CERTIFICATE", tls("server.crt")),
            ("ORDERER_ADMIN_TLS_PRIVATEKEY", tls("server.key")),
            ("ORDERER_ADMIN_TLS_ROOTCAS", format!("[{}]", tls("ca.crt"))),
            ("ORDERER_ADMIN_TLS_CLIENTAUTHREQUIRED", "true".to_string()),
            ("ORDERER_ADMIN_TLS_CLIENTROOTCAS", format!("[{}]", tls("ca.crt"))),
            ("ORDERER_FILELEDGER_LOCATION", "/var/hyperledger/production/orderer".to_string()),
        ]),
        working_dir: Some("/root".to_string()),
        command: vec!["orderer".to_string()],
        ports: vec![
            port_mapping(ports.main),
            port_mapping(ports.secondary),
            port_mapping(ports.operations),
        ],
        volumes: vec![
            relative_mount(&node_config_dir(&orderer.name), ORDERER_CONFIG_MOUNT, true),
            relative_mount(&orderer.msp_path, &format!("{}/msp", ORDERER_NODE_MOUNT), true),
            relative_mount(&node.join("tls"), &format!("{}/tls", ORDERER_NODE_MOUNT), true),
            relative_mount(&data, "/var/hyperledger/production/orderer", false),
        ],
        healthcheck: Some(HealthCheck::shell(
            format!(
                "test -f /var/hyperledger/production/orderer/chains/{}/blockfile_000000",
                desc.channel_name
            ),
            "30s",
            "10s",
        )),
        depends_on: depends_on(dependency),
        logging: Logging::default(),
        restart: "unless-stopped".to_string(),
        networks: vec![desc.network_name.clone()],
    }
}

fn peer_service(
    desc: &NetworkDescriptor,
    peer: &PeerNode,
    domain: &str,
    image: &str,
    dependency: &StartDependency,
) -> Service {
    let node = node_dir(&peer.msp_path);
    let ports = peer.ports;
    let address = format!("{}:{}", peer.name, ports.main);
    let tls = |file: &str| format!("{}/tls/{}", PEER_NODE_MOUNT, file);

    Service {
        container_name: node_service(desc, &peer.name),
        image: image.to_string(),
        hostname: Some(format!("{}.{}", peer.name, domain)),
        environment: env([
            ("FABRIC_CFG_PATH", PEER_CONFIG_MOUNT.to_string()),
            ("FABRIC_LOGGING_SPEC", "INFO".to_string()),
            ("CORE_PEER_ID", peer.name.clone()),
            ("CORE_PEER_ADDRESS", address.clone()),
            ("CORE_PEER_LISTENADDRESS", format!("0.0.0.0:{}", ports.main)),
            ("CORE_PEER_CHAINCODEADDRESS", format!("{}:{}", peer.name, ports.secondary)),
            ("CORE_PEER_CHAINCODELISTENADDRESS", format!("0.0.0.0:{}", ports.secondary)),
            (
                "CORE_PEER_GOSSIP_BOOTSTRAP",
                peer.gossip_bootstrap.clone().unwrap_or_else(|| address.clone()),
            ),
            ("CORE_PEER_GOSSIP_ENDPOINT", address.clone()),
            ("CORE_PEER_GOSSIP_EXTERNALENDPOINT", address.clone()),
            ("CORE_PEER_LOCALMSPID", peer.msp_id.clone()),
            ("CORE_PEER_MSPCONFIGPATH", format!("{}/msp", PEER_NODE_MOUNT)),
            ("CORE_PEER_TLS_ENABLED", peer.tls_enabled.to_string()),
            ("CORE_PEER_TLS_CERT_FILE", tls("server.crt")),
            ("CORE_PEER_TLS_KEY_FILE", tls("server.key")),
            ("CORE_PEER_TLS_ROOTCERT_FILE", tls("ca.crt")),
            ("CORE_OPERATIONS_LISTENADDRESS", format!("0.0.0.0:{}", ports.operations)),
            ("CORE_METRICS_PROVIDER", "disabled".to_string()),
            ("CORE_VM_ENDPOINT", "unix:///host/var/run/docker.sock".to_string()),
            ("CORE_VM_DOCKER_HOSTCONFIG_NETWORKMODE", desc.network_name.clone()),
            ("CORE_LEDGER_STATE_STATEDATABASE", "goleveldb".to_string()),
        ]),
        working_dir: Some("/root".to_string()),
        command: vec!["peer".to_string(), "node".to_string(), "start".to_string()],
        ports: vec![
            port_mapping(ports.main),
            port_mapping(ports.secondary),
            port_mapping(ports.operations),
        ],
        volumes: vec![
            relative_mount(&node_config_dir(&peer.name), PEER_CONFIG_MOUNT, true),
            relative_mount(&node, PEER_NODE_MOUNT, true),
            relative_mount(&node.join("data"), "/var/hyperledger/production", false),
            "/var/run/docker.sock:/host/var/run/docker.sock".to_string(),
        ],
        healthcheck: Some(HealthCheck::shell(
            "peer node status | grep -q 'status:STARTED'".to_string(),
            "30s",
            "10s",
        )),
        depends_on: depends_on(dependency),
        logging: Logging::default(),
        restart: "unless-stopped".to_string(),
        networks: vec![desc.network_name.clone()],
    }
}

/// Build the full compose model
pub fn build(desc: &NetworkDescriptor, images: &ImagesConfig) -> ComposeFile {
    let mut services = BTreeMap::new();
    let mut volumes = BTreeMap::new();

    // Every organization keeps its volume, even one whose service is gone.
    for org in &desc.organizations {
        volumes.insert(org.ca_service(), VolumeDef::default());
    }

    let domain_of = |org: &str| {
        desc.org(org)
            .map(|o| o.domain.clone())
            .unwrap_or_else(|| desc.domain.clone())
    };

    for binding in plan(desc) {
        volumes.insert(binding.volume.clone(), VolumeDef::default());

        let service = if let Some(org) = desc
            .organizations
            .iter()
            .find(|o| o.ca_service() == binding.service)
        {
            ca_service(desc, org, &images.ca)
        } else if let Some(orderer) = desc.orderers.iter().find(|o| o.name == binding.node) {
            orderer_service(desc, orderer, &domain_of(&orderer.org), &images.orderer, &binding.dependency)
        } else if let Some(peer) = desc.peers.iter().find(|p| p.name == binding.node) {
            peer_service(desc, peer, &domain_of(&peer.org), &images.peer, &binding.dependency)
        } else {
            continue;
        };
        services.insert(binding.service, service);
    }

    let networks = BTreeMap::from([(
        desc.network_name.clone(),
        NetworkDef {
            name: desc.network_name.clone(),
            driver: "bridge".to_string(),
        },
    )]);

    ComposeFile {
        networks,
        services,
        volumes,
    }
}

/// Write `docker-compose.yml` under the base path
pub fn write(desc: &NetworkDescriptor, compose: &ComposeFile) -> Result<PathBuf> {
    let path = desc.path(COMPOSE_FILE);
    std::fs::create_dir_all(&desc.base_path)?;
    std::fs::write(&path, serde_yaml::to_string(compose)?)?;
    info!(
        path = %path.display(),
        services = compose.services.len(),
        volumes = compose.volumes.len(),
        "Wrote compose file"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::node_msp_path;
    use crate::descriptor::tests::sample_org;
    use crate::descriptor::{OrgKind, OrgStatus};
    use crate::ports::{orderer_ports, peer_ports};
    use std::collections::BTreeSet;

    fn descriptor(peers: usize, orderers: usize) -> NetworkDescriptor {
        let mut desc = NetworkDescriptor::new("/srv/net", "pm3", "pm3.org", "pm3");
        let org = sample_org("pm3_org_tls", OrgKind::Root, 9000);
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
    fn test_service_counts() {
        let compose = build(&descriptor(2, 1), &ImagesConfig::default());
        assert_eq!(compose.services.len(), 4);
        assert_eq!(compose.networks.len(), 1);
        assert_eq!(compose.networks["pm3"].driver, "bridge");
        assert!(compose.services.contains_key("pm3_org_tls_ca"));
        assert!(compose.services.contains_key("pm3_peer0"));
        assert!(compose.services.contains_key("pm3_peer1"));
        assert!(compose.services.contains_key("pm3_orderer0"));
    }

    #[test]
    fn test_start_dependencies() {
        let compose = build(&descriptor(1, 1), &ImagesConfig::default());
        let orderer = &compose.services["pm3_orderer0"];
        assert_eq!(orderer.depends_on["pm3_org_tls_ca"].condition, "service_healthy");
        let peer = &compose.services["pm3_peer0"];
        assert_eq!(peer.depends_on["pm3_orderer0"].condition, "service_started");

        let lonely = build(&descriptor(1, 0), &ImagesConfig::default());
        assert_eq!(
            lonely.services["pm3_peer0"].depends_on["pm3_org_tls_ca"].condition,
            "service_healthy"
        );
    }

    #[test]
    fn test_ca_probe_follows_tls_flag() {
        let mut desc = descriptor(0, 0);
        let tls = build(&desc, &ImagesConfig::default());
        let probe = &tls.services["pm3_org_tls_ca"].healthcheck.as_ref().unwrap().test[1];
        assert!(probe.contains("https://localhost:9000"));
        assert!(probe.contains("--tls.certfiles"));

        desc.organizations[0].ca.tls_enabled = false;
        let plain = build(&desc, &ImagesConfig::default());
        let probe = &plain.services["pm3_org_tls_ca"].healthcheck.as_ref().unwrap().test[1];
        assert!(probe.contains("http://localhost:9000"));
        assert!(!probe.contains("--tls.certfiles"));
    }

    #[test]
    fn test_node_ports_and_mounts() {
        let compose = build(&descriptor(1, 1), &ImagesConfig::default());
        let peer = &compose.services["pm3_peer0"];
        assert_eq!(peer.ports, vec!["7050:7050", "8100:8100", "9050:9050"]);
        assert!(peer
            .volumes
            .contains(&"./config/peer0:/etc/hyperledger/peercfg:ro".to_string()));
        assert_eq!(peer.hostname.as_deref(), Some("peer0.pm3_org_tls.pm3.org"));

        let orderer = &compose.services["pm3_orderer0"];
        assert_eq!(orderer.ports, vec!["7100:7100", "9200:9200", "9150:9150"]);
        assert!(orderer.healthcheck.as_ref().unwrap().test[1].contains("chains/pm3/blockfile_000000"));
    }

    #[test]
    fn test_volumes_only_grow() {
        let mut desc = descriptor(1, 0);
        let before: BTreeSet<String> = build(&desc, &ImagesConfig::default())
            .volumes
            .into_keys()
            .collect();

        let mut failed = sample_org("org1", OrgKind::Member, 9001);
        failed.status = OrgStatus::Failed {
            step: "enroll-org-admin".to_string(),
        };
        desc.organizations.push(failed);
        let org = desc.organizations[0].clone();
        desc.peers.push(PeerNode {
            name: "peer1".to_string(),
            org: org.name.clone(),
            ports: peer_ports(1).unwrap(),
            msp_path: node_msp_path(&org, "peers", "peer1"),
            msp_id: org.msp_id.clone(),
            tls_enabled: true,
            gossip_bootstrap: None,
            joined: false,
        });

        let after = build(&desc, &ImagesConfig::default());
        let after_volumes: BTreeSet<String> = after.volumes.keys().cloned().collect();
        assert!(before.is_subset(&after_volumes));
        assert!(after_volumes.contains("org1_ca"));
        assert!(!after.services.contains_key("org1_ca"));
    }

    #[test]
    fn test_written_file_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut desc = descriptor(1, 1);
        desc.base_path = dir.path().to_path_buf();
        let compose = build(&desc, &ImagesConfig::default());
        let path = write(&desc, &compose).unwrap();
        let parsed: ComposeFile = serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed, compose);
    }
}
