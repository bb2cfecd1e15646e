// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity issuance and enrollment chain
//!
//! Identities are issued in a strict order, each step consuming what the
//! previous one produced:
//!
//! 1. root TLS authority server state (`fabric-ca-server init`)
//! 2. TLS admin enrollment against the running root authority
//! 3. per-organization bootstrap identity, registered and enrolled with the root
//! 4. per-organization authority, initialised with that bootstrap identity
//! 5. organization admin enrollment against the running organization authority
//!
//! Steps 2 and 5 need a running authority; starting it is the caller's job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::Value;
use tracing::{debug, info, warn};

use crate::config::{NetworkConfig, CA_PASSWORD_ENV};
use crate::descriptor::{
    CaConstraint, CertificateAuthority, Identity, OrgKind, OrgStatus, Organization, SigningProfile,
};
use crate::error::{Result, RoostError};
use crate::ports::{allocate_port, PortClass};
use crate::readiness::Cancellation;
use crate::runtime::{CommandSpec, ProcessRunner, Toolchain};
use crate::template;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const ROOT_ADMIN_USER: &str = "tls-admin";
pub const CA_CONFIG_FILE: &str = "fabric-ca-server-config.yaml";
pub const CA_CERT_FILE: &str = "ca-cert.pem";

/// Root authority server directory, relative to the base path
pub const ROOT_CA_DIR: &str = "organizations/server/root-ca-server/tls-ca";
/// Client home for every enrollment, relative to the base path
pub const CLIENT_DIR: &str = "organizations/client";
/// Root TLS certificate as seen from the client home
pub const TLS_ROOT_CERT: &str = "tls-root-cert/tls-ca-cert.pem";
/// TLS admin MSP as seen from the client home
pub const TLS_ADMIN_MSP: &str = "tls-ca/tlsadmin/msp";

pub mod steps {
    pub const INIT_ROOT_CA: &str = "init-root-ca";
    pub const START_ROOT_CA: &str = "start-root-ca";
    pub const ENROLL_TLS_ADMIN: &str = "enroll-tls-admin";
    pub const REGISTER_BOOTSTRAP: &str = "register-bootstrap-identity";
    pub const ENROLL_BOOTSTRAP: &str = "enroll-bootstrap-identity";
    pub const INIT_ORG_CA: &str = "init-org-ca";
    pub const START_ORG_CA: &str = "start-org-ca";
    pub const ENROLL_ORG_ADMIN: &str = "enroll-org-admin";
}

/// Check the root admin password before anything touches disk
pub fn validate_root_password(password: Option<&str>) -> Result<String> {
    match password {
        None | Some("") => Err(RoostError::validation(format!(
            "{} must be set for the root authority admin",
            CA_PASSWORD_ENV
        ))),
        Some(p) if p.chars().count() < MIN_PASSWORD_LEN => Err(RoostError::validation(format!(
            "{} must be at least {} characters",
            CA_PASSWORD_ENV, MIN_PASSWORD_LEN
        ))),
        Some(p) => Ok(p.to_string()),
    }
}

/// Root admin password from the environment
pub fn root_password_from_env() -> Result<String> {
    let value = std::env::var(CA_PASSWORD_ENV).ok();
    validate_root_password(value.as_deref())
}

/// Bootstrap credentials derived from an organization identifier
pub fn bootstrap_credentials(identifier: &str) -> (String, String) {
    (format!("{}-admin", identifier), format!("{}-adminpw", identifier))
}

/// Admin password for an organization's authority, resolved at use time
pub fn admin_password(org: &Organization) -> Result<String> {
    match org.kind {
        OrgKind::Root => root_password_from_env(),
        OrgKind::Member => {
            let identifier = org.bootstrap_id.as_deref().ok_or_else(|| RoostError::InvalidConfig {
                message: format!("organization '{}' has no bootstrap identifier", org.name),
            })?;
            Ok(bootstrap_credentials(identifier).1)
        }
    }
}

/// Identity registered with the root authority to bootstrap an organization authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapIdentity {
    pub name: String,
    pub secret: String,
    /// Absolute paths of the enrolled TLS certificate and key
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Runs the enrollment chain against one base path
pub struct IdentityChain {
    runner: Arc<dyn ProcessRunner>,
    toolchain: Toolchain,
    base_path: PathBuf,
    network: NetworkConfig,
    cancel: Cancellation,
}

impl IdentityChain {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        toolchain: Toolchain,
        base_path: &Path,
        network: NetworkConfig,
        cancel: Cancellation,
    ) -> Self {
        Self {
            runner,
            toolchain,
            base_path: base_path.to_path_buf(),
            network,
            cancel,
        }
    }

    fn client_home(&self) -> PathBuf {
        self.base_path.join(CLIENT_DIR)
    }

    fn client(&self, step: &str) -> CommandSpec {
        let home = self.client_home();
        CommandSpec::new(step, self.toolchain.program("fabric-ca-client"))
            .current_dir(&home)
            .env("FABRIC_CA_CLIENT_HOME", home.display().to_string())
    }

    fn csr_hosts(&self) -> String {
        self.network.csr_hosts.join(",")
    }

    fn root_ca_name(&self) -> String {
        format!("{}-tls-ca", self.network.name)
    }

    /// Step 1: fresh root authority server state with a patched config
    pub async fn bootstrap_root_authority(&self, password: &str) -> Result<Organization> {
        let dir = self.base_path.join(ROOT_CA_DIR);
        info!(path = %dir.display(), "Creating root TLS authority");
        reset_dir(&dir)?;

        let init = CommandSpec::new(steps::INIT_ROOT_CA, self.toolchain.program("fabric-ca-server"))
            .args(["init", "-b"])
            .arg(format!("{}:{}", ROOT_ADMIN_USER, password))
            .current_dir(&dir);
        self.runner.run_checked(&init, &self.cancel).await?;

        let port = allocate_port(PortClass::CertificateAuthority, 0)?;
        let ca_name = self.root_ca_name();
        let config_path = dir.join(CA_CONFIG_FILE);
        let mut doc = template::read_yaml(&config_path)?;
        template::set_path(&mut doc, "port", u64::from(port));
        template::set_path(&mut doc, "tls.enabled", true);
        template::set_path(&mut doc, "ca.name", ca_name.as_str());
        template::extend_unique(&mut doc, "csr.hosts", &self.network.csr_hosts);
        template::remove_path(&mut doc, "signing.profiles.ca");
        clear_generated_material(&dir)?;
        template::write_yaml(&config_path, &doc)?;

        let (signing_profiles, affiliations) = describe_authority(&doc);
        Ok(Organization {
            name: format!("{}_org_tls", self.network.name),
            domain: format!("tls-ca.{}", self.network.domain),
            msp_id: ca_name.clone(),
            kind: OrgKind::Root,
            status: OrgStatus::Pending,
            crypto_path: PathBuf::from(ROOT_CA_DIR),
            bootstrap_id: None,
            ca: CertificateAuthority {
                name: ca_name,
                host: self.network.ca_host.clone(),
                port,
                admin_user: ROOT_ADMIN_USER.to_string(),
                tls_enabled: true,
                signing_profiles,
                affiliations,
            },
            admin: Identity {
                name: ROOT_ADMIN_USER.to_string(),
                kind: "admin".to_string(),
                affiliation: String::new(),
                msp_path: None,
            },
            identities: Vec::new(),
        })
    }

    /// Step 2: enroll the TLS admin against the running root authority
    pub async fn enroll_root_admin(&self, root: &mut Organization, password: &str) -> Result<()> {
        let home = self.client_home();
        let root_cert = home.join(TLS_ROOT_CERT);
        if let Some(parent) = root_cert.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(
            self.base_path.join(&root.crypto_path).join(CA_CERT_FILE),
            &root_cert,
        )?;

        let enroll = self
            .client(steps::ENROLL_TLS_ADMIN)
            .args(["enroll", "-d", "-u"])
            .arg(credential_url(&root.ca, &root.ca.admin_user, password))
            .args(["--tls.certfiles", TLS_ROOT_CERT])
            .args(["--enrollment.profile", "tls"])
            .arg("--csr.hosts")
            .arg(self.csr_hosts())
            .args(["--mspdir", TLS_ADMIN_MSP]);
        self.runner.run_checked(&enroll, &self.cancel).await?;

        root.admin.msp_path = Some(Path::new(CLIENT_DIR).join(TLS_ADMIN_MSP));
        info!(org = %root.name, "TLS admin enrolled");
        Ok(())
    }

    /// Step 3: register and enroll `<identifier>-admin` with the root authority
    pub async fn register_bootstrap_identity(
        &self,
        root: &Organization,
        identifier: &str,
    ) -> Result<BootstrapIdentity> {
        let (name, secret) = bootstrap_credentials(identifier);
        info!(identity = %name, "Registering organization bootstrap identity");

        let register = self
            .client(steps::REGISTER_BOOTSTRAP)
            .args(["register", "-d", "--id.name", name.as_str(), "--id.secret", secret.as_str()])
            .args(["-u", root.ca.url().as_str()])
            .args(["--tls.certfiles", TLS_ROOT_CERT])
            .args(["--mspdir", TLS_ADMIN_MSP]);
        let output = self.runner.run(&register, &self.cancel).await?;
        if !output.success {
            if output.stderr.contains("already registered") {
                // Recreating a failed organization reuses the registration.
                warn!(identity = %name, "Bootstrap identity already registered, re-enrolling");
            } else {
                output.check(&register)?;
            }
        }

        let msp_dir = format!("tls-ca/{}/msp", name);
        let enroll = self
            .client(steps::ENROLL_BOOTSTRAP)
            .args(["enroll", "-d", "-u"])
            .arg(credential_url(&root.ca, &name, &secret))
            .args(["--tls.certfiles", TLS_ROOT_CERT])
            .args(["--enrollment.profile", "tls"])
            .arg("--csr.hosts")
            .arg(self.csr_hosts())
            .args(["--mspdir", msp_dir.as_str()]);
        self.runner.run_checked(&enroll, &self.cancel).await?;

        let msp = self.client_home().join(&msp_dir);
        let key = normalize_keystore(&msp.join("keystore"))?;
        Ok(BootstrapIdentity {
            name,
            secret,
            cert: msp.join("signcerts").join("cert.pem"),
            key,
        })
    }

    /// Step 4: initialise the organization authority with its bootstrap identity
    pub async fn create_org_authority(
        &self,
        name: &str,
        domain: &str,
        identifier: &str,
        ca_index: usize,
        bootstrap: &BootstrapIdentity,
    ) -> Result<Organization> {
        let relative = Path::new("organizations/server").join(name);
        let dir = self.base_path.join(&relative);
        let port = allocate_port(PortClass::CertificateAuthority, ca_index)?;
        info!(org = %name, port, "Creating organization authority");

        reset_dir(&dir)?;
        let tls = dir.join("tls");
        std::fs::create_dir_all(&tls)?;
        std::fs::copy(&bootstrap.cert, tls.join("cert.pem"))?;
        std::fs::copy(&bootstrap.key, tls.join("key.pem"))?;

        let init = CommandSpec::new(steps::INIT_ORG_CA, self.toolchain.program("fabric-ca-server"))
            .args(["init", "-b"])
            .arg(format!("{}:{}", bootstrap.name, bootstrap.secret))
            .current_dir(&dir);
        self.runner.run_checked(&init, &self.cancel).await?;

        let config_path = dir.join(CA_CONFIG_FILE);
        let mut doc = template::read_yaml(&config_path)?;
        template::set_path(&mut doc, "port", u64::from(port));
        template::set_path(&mut doc, "tls.enabled", true);
        template::set_path(&mut doc, "tls.certfile", "tls/cert.pem");
        template::set_path(&mut doc, "tls.keyfile", "tls/key.pem");
        template::set_path(&mut doc, "ca.name", name);
        template::extend_unique(&mut doc, "csr.hosts", &self.network.csr_hosts);
        // Only one level of intermediates below an organization authority.
        template::set_path(&mut doc, "csr.ca.pathlength", 1u64);
        template::set_path(&mut doc, "signing.profiles.ca.caconstraint.isca", true);
        template::set_path(&mut doc, "signing.profiles.ca.caconstraint.maxpathlen", 0u64);
        template::set_path(&mut doc, "signing.profiles.ca.caconstraint.maxpathlenzero", true);
        clear_generated_material(&dir)?;
        template::write_yaml(&config_path, &doc)?;

        let mut org = self.pending_member(name, domain, identifier, ca_index)?;
        let (signing_profiles, affiliations) = describe_authority(&doc);
        org.ca.admin_user = bootstrap.name.clone();
        org.ca.signing_profiles = signing_profiles;
        org.ca.affiliations = affiliations;
        org.admin.name = bootstrap.name.clone();
        Ok(org)
    }

    /// Record for a member organization whose chain has not run yet
    pub fn pending_member(
        &self,
        name: &str,
        domain: &str,
        identifier: &str,
        ca_index: usize,
    ) -> Result<Organization> {
        let (admin, _) = bootstrap_credentials(identifier);
        Ok(Organization {
            name: name.to_string(),
            domain: domain.to_string(),
            msp_id: name.to_string(),
            kind: OrgKind::Member,
            status: OrgStatus::Pending,
            crypto_path: Path::new("organizations/server").join(name),
            bootstrap_id: Some(identifier.to_string()),
            ca: CertificateAuthority {
                name: name.to_string(),
                host: self.network.ca_host.clone(),
                port: allocate_port(PortClass::CertificateAuthority, ca_index)?,
                admin_user: admin.clone(),
                tls_enabled: true,
                signing_profiles: BTreeMap::new(),
                affiliations: BTreeMap::new(),
            },
            admin: Identity {
                name: admin,
                kind: "admin".to_string(),
                affiliation: String::new(),
                msp_path: None,
            },
            identities: Vec::new(),
        })
    }

    /// Step 5: enroll the organization admin against its own running authority
    pub async fn enroll_org_admin(&self, org: &mut Organization) -> Result<()> {
        let password = admin_password(org)?;
        let msp_dir = format!("{}/{}/msp", org.name, org.ca.admin_user);
        let enroll = self
            .client(steps::ENROLL_ORG_ADMIN)
            .args(["enroll", "-d", "-u"])
            .arg(credential_url(&org.ca, &org.ca.admin_user, &password))
            .args(["--tls.certfiles", TLS_ROOT_CERT])
            .args(["--mspdir", msp_dir.as_str()]);
        self.runner.run_checked(&enroll, &self.cancel).await?;

        org.admin.msp_path = Some(Path::new(CLIENT_DIR).join(&msp_dir));
        info!(org = %org.name, admin = %org.ca.admin_user, "Organization admin enrolled");
        Ok(())
    }
}

fn credential_url(ca: &CertificateAuthority, user: &str, secret: &str) -> String {
    let scheme = if ca.tls_enabled { "https" } else { "http" };
    format!("{}://{}:{}@{}:{}", scheme, user, secret, ca.host, ca.port)
}

/// Remove a previous server directory so init starts clean
fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        debug!(path = %dir.display(), "Removing previous authority state");
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Drop the msp and certificate `init` produced; the container regenerates them from the patched config
fn clear_generated_material(dir: &Path) -> Result<()> {
    let msp = dir.join("msp");
    if msp.exists() {
        std::fs::remove_dir_all(&msp)?;
    }
    match std::fs::remove_file(dir.join(CA_CERT_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Rename the single generated private key to `key.pem`
fn normalize_keystore(keystore: &Path) -> Result<PathBuf> {
    let target = keystore.join("key.pem");
    let mut keys: Vec<PathBuf> = std::fs::read_dir(keystore)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && *p != target)
        .collect();
    keys.sort();

    match keys.first() {
        Some(key) => {
            debug!(from = %key.display(), to = %target.display(), "Renaming enrolled key");
            std::fs::rename(key, &target)?;
            Ok(target)
        }
        None if target.exists() => Ok(target),
        None => Err(RoostError::MalformedDocument {
            path: keystore.to_path_buf(),
            message: "enrollment produced no private key".to_string(),
        }),
    }
}

/// Signing profiles and affiliations as recorded in the authority config
fn describe_authority(
    doc: &Value,
) -> (BTreeMap<String, SigningProfile>, BTreeMap<String, Vec<String>>) {
    let mut profiles = BTreeMap::new();
    let strings = |v: Option<&Value>| -> Vec<String> {
        v.and_then(Value::as_sequence)
            .map(|seq| seq.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };

    if let Some(Value::Mapping(map)) = template::get_path(doc, "signing.profiles") {
        for (name, profile) in map {
            let Some(name) = name.as_str() else { continue };
            let ca_constraint = profile.get("caconstraint").map(|c| CaConstraint {
                is_ca: c.get("isca").and_then(Value::as_bool).unwrap_or(false),
                max_path_len: c
                    .get("maxpathlen")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
                max_path_len_zero: c.get("maxpathlenzero").and_then(Value::as_bool).unwrap_or(false),
            });
            profiles.insert(
                name.to_string(),
                SigningProfile {
                    usage: strings(profile.get("usage")),
                    expiry: profile
                        .get("expiry")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    ca_constraint,
                },
            );
        }
    }

    let mut affiliations = BTreeMap::new();
    if let Some(Value::Mapping(map)) = doc.get("affiliations") {
        for (name, units) in map {
            if let Some(name) = name.as_str() {
                affiliations.insert(name.to_string(), strings(Some(units)));
            }
        }
    }

    (profiles, affiliations)
}
