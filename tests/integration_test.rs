// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for Kea-Roost

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

use kea_roost::descriptor::{
    CertificateAuthority, Identity, OrgKind, OrgStatus, Organization, DESCRIPTOR_FILE,
};
use kea_roost::{NetworkDescriptor, NetworkState};

/// A network with only its root organization, ready for nodes
fn write_root_only_network(base: &Path) {
    let mut desc = NetworkDescriptor::new(base, "pm3", "pm3.org", "pm3");
    desc.organizations.push(Organization {
        name: "pm3_org_tls".to_string(),
        domain: "tls-ca.pm3.org".to_string(),
        msp_id: "pm3_org_tls".to_string(),
        kind: OrgKind::Root,
        status: OrgStatus::Ready,
        crypto_path: PathBuf::from("organizations/server/root-ca-server/tls-ca"),
        bootstrap_id: None,
        ca: CertificateAuthority {
            name: "pm3_org_tls".to_string(),
            host: "localhost".to_string(),
            port: 9000,
            admin_user: "tls-admin".to_string(),
            tls_enabled: true,
            signing_profiles: BTreeMap::new(),
            affiliations: BTreeMap::new(),
        },
        admin: Identity {
            name: "tls-admin".to_string(),
            kind: "admin".to_string(),
            affiliation: String::new(),
            msp_path: None,
        },
        identities: Vec::new(),
    });
    desc.state = NetworkState::OrganizationsReady;
    desc.save().unwrap();
}

fn roost(config_dir: &Path, base: &Path) -> Command {
    let mut cmd = Command::cargo_bin("roost").unwrap();
    cmd.arg("--config")
        .arg(config_dir.join("roost.toml"))
        .arg("--base-path")
        .arg(base);
    cmd
}

/// Test the version command
#[test]
fn test_version_command() {
    let mut cmd = Command::cargo_bin("roost").unwrap();
    cmd.arg("version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Kea-Roost"))
        .stdout(predicate::str::contains("Ledger Nest"));
}

/// Test the help output
#[test]
fn test_help_command() {
    let mut cmd = Command::cargo_bin("roost").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("permissioned ledger"))
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("create-channel"))
        .stdout(predicate::str::contains("add-org"));
}

/// Test that commands on a missing network fail with a hint
#[test]
fn test_summary_without_network() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().join("network-config");

    roost(temp_dir.path(), &base)
        .arg("summary")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No network found"));
}

/// Test the summary of a recorded network
#[test]
fn test_summary_of_existing_network() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().join("network-config");
    write_root_only_network(&base);

    roost(temp_dir.path(), &base)
        .arg("summary")
        .assert()
        .success()
        .stdout(predicate::str::contains("FABRIC NETWORK CONFIGURATION SUMMARY"))
        .stdout(predicate::str::contains("pm3_org_tls"))
        .stdout(predicate::str::contains("organizations ready"));
}

/// Test that init refuses to run without the root admin password
#[test]
fn test_init_requires_password() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().join("network-config");

    roost(temp_dir.path(), &base)
        .env_remove("FABRIC_CA_ADMIN_PASSWORD")
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("FABRIC_CA_ADMIN_PASSWORD"));

    assert!(!base.exists());
}

/// Test that init never reuses an existing base path
#[test]
fn test_init_rejects_existing_base() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().join("network-config");
    write_root_only_network(&base);
    let before = std::fs::read(base.join(DESCRIPTOR_FILE)).unwrap();

    roost(temp_dir.path(), &base)
        .env("FABRIC_CA_ADMIN_PASSWORD", "supersecret")
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    assert_eq!(std::fs::read(base.join(DESCRIPTOR_FILE)).unwrap(), before);
}

/// Test that a network whose root authority failed points back to init
#[test]
fn test_unfinished_root_is_resumed_by_init() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().join("network-config");
    write_root_only_network(&base);
    let mut desc = NetworkDescriptor::load(&base).unwrap();
    desc.organizations[0].status = OrgStatus::Failed {
        step: "enroll-tls-admin".to_string(),
    };
    desc.state = NetworkState::Uninitialized;
    desc.save().unwrap();

    roost(temp_dir.path(), &base)
        .arg("add-peer")
        .assert()
        .failure()
        .stderr(predicate::str::contains("re-run init"));

    // The base path is accepted; only the missing password stops it.
    roost(temp_dir.path(), &base)
        .env_remove("FABRIC_CA_ADMIN_PASSWORD")
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("FABRIC_CA_ADMIN_PASSWORD"))
        .stderr(predicate::str::contains("already exists").not());
}

/// Test that a channel cannot be formed without orderers and nothing is written
#[test]
fn test_create_channel_without_orderers() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().join("network-config");
    write_root_only_network(&base);
    let before = std::fs::read(base.join(DESCRIPTOR_FILE)).unwrap();

    roost(temp_dir.path(), &base)
        .arg("create-channel")
        .arg("--channel")
        .arg("trade")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no orderers configured"));

    assert_eq!(std::fs::read(base.join(DESCRIPTOR_FILE)).unwrap(), before);
    assert!(!base.join("channel-artifacts").exists());
}

/// Test compose generation from a recorded network
#[test]
fn test_generate_compose() {
    let temp_dir = tempdir().unwrap();
    let base = temp_dir.path().join("network-config");
    write_root_only_network(&base);

    roost(temp_dir.path(), &base)
        .arg("generate-compose")
        .assert()
        .success()
        .stdout(predicate::str::contains("docker-compose.yml"));

    let compose = std::fs::read_to_string(base.join("docker-compose.yml")).unwrap();
    assert!(compose.contains("pm3_org_tls_ca"));

    let saved = NetworkDescriptor::load(&base).unwrap();
    assert_eq!(saved.state, NetworkState::TopologyGenerated);
}

/// Test showing the effective configuration
#[test]
fn test_config_command() {
    let temp_dir = tempdir().unwrap();
    std::fs::write(
        temp_dir.path().join("roost.toml"),
        "[network]\nname = \"trade\"\ndomain = \"trade.example.com\"\nchannel = \"deals\"\n",
    )
    .unwrap();

    roost(temp_dir.path(), temp_dir.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("trade.example.com"))
        .stdout(predicate::str::contains("deals"));
}
