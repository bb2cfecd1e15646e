// SPDX-License-Identifier: AGPL-3.0-or-later
//! Network lifecycle orchestration
//!
//! [`Network`] owns the descriptor of one base path and drives the other
//! components in dependency order:
//!
//! ```text
//! init ─► root authority ─► organizations ─► nodes ─► compose ─► start ─► genesis ─► join
//! ```
//!
//! The descriptor is saved after every mutation, so an interrupted run
//! resumes from what is on disk. Nothing is rolled back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn, Instrument, Span};

use crate::artifacts::{self, node_msp_path};
use crate::channel;
use crate::config::{Config, BIN_PATH_ENV};
use crate::descriptor::{
    NetworkDescriptor, NetworkState, OrdererNode, OrgKind, OrgStatus, Organization, PeerNode,
};
use crate::error::{Result, RoostError};
use crate::identity::{self, steps, IdentityChain, CA_CERT_FILE};
use crate::ports::{orderer_ports, peer_ports, validate_count, NodeKind};
use crate::readiness::{wait_for_file, wait_for_tcp, Cancellation, PollPolicy};
use crate::runtime::{ComposeEngine, LineSink, ProcessRunner, Toolchain};
use crate::topology::{self, COMPOSE_FILE};

/// Parameters of [`Network::init`]
#[derive(Debug, Clone, Default)]
pub struct InitRequest {
    pub peers: usize,
    pub orderers: usize,
    /// Start the containers and form the channel once everything is generated
    pub start: bool,
    /// Root authority admin password, normally taken from `FABRIC_CA_ADMIN_PASSWORD`
    pub admin_password: Option<String>,
    /// Member organization created right after the root; it then owns the nodes
    pub organization: Option<OrgRequest>,
}

/// A member organization to create during [`Network::init`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgRequest {
    pub name: String,
    pub domain: String,
    /// Prefix of the bootstrap identity; defaults to the name
    pub identifier: Option<String>,
}

/// One network rooted at a base path
pub struct Network {
    descriptor: NetworkDescriptor,
    config: Config,
    runner: Arc<dyn ProcessRunner>,
    toolchain: Toolchain,
    compose: ComposeEngine,
    cancel: Cancellation,
    span: Span,
}

/// Command that resumes a failed organization
fn retry_command(kind: OrgKind) -> &'static str {
    match kind {
        OrgKind::Root => "init",
        OrgKind::Member => "add-org",
    }
}

/// Step label carried by a process error, or `fallback`
fn failed_step(err: &RoostError, fallback: &str) -> String {
    match err {
        RoostError::ProcessFailed { step, .. } | RoostError::ProcessSpawn { step, .. } => {
            step.clone()
        }
        _ => fallback.to_string(),
    }
}

impl Network {
    fn assemble(
        descriptor: NetworkDescriptor,
        config: Config,
        runner: Arc<dyn ProcessRunner>,
        cancel: Cancellation,
        span: Span,
    ) -> Self {
        let toolchain = Toolchain::new(config.bin_path());
        let compose = ComposeEngine::new(
            runner.clone(),
            &descriptor.base_path,
            &descriptor.path(COMPOSE_FILE),
            cancel.clone(),
        );
        Self {
            descriptor,
            config,
            runner,
            toolchain,
            compose,
            cancel,
            span,
        }
    }

    /// A network that does not exist yet; nothing is written before [`Network::init`]
    pub fn create(
        base_path: &Path,
        config: Config,
        runner: Arc<dyn ProcessRunner>,
        cancel: Cancellation,
        span: Span,
    ) -> Self {
        let descriptor = NetworkDescriptor::new(
            base_path,
            config.network.name.clone(),
            config.network.domain.clone(),
            config.network.channel.clone(),
        );
        Self::assemble(descriptor, config, runner, cancel, span)
    }

    /// Load the network persisted under `base_path`
    pub fn open(
        base_path: &Path,
        config: Config,
        runner: Arc<dyn ProcessRunner>,
        cancel: Cancellation,
        span: Span,
    ) -> Result<Self> {
        let descriptor = NetworkDescriptor::load(base_path)?;
        Ok(Self::assemble(descriptor, config, runner, cancel, span))
    }

    pub fn descriptor(&self) -> &NetworkDescriptor {
        &self.descriptor
    }

    pub fn summary(&self) -> String {
        self.descriptor.summary()
    }

    fn identity_chain(&self) -> IdentityChain {
        let mut network = self.config.network.clone();
        network.name = self.descriptor.network_name.clone();
        network.domain = self.descriptor.domain.clone();
        IdentityChain::new(
            self.runner.clone(),
            self.toolchain.clone(),
            &self.descriptor.base_path,
            network,
            self.cancel.clone(),
        )
    }

    fn put_org(&mut self, index: usize, org: Organization) {
        match self.descriptor.organizations.get_mut(index) {
            Some(slot) => *slot = org,
            None => self.descriptor.organizations.push(org),
        }
    }

    /// Mark `name` failed at `step`, persist, and build the error to return
    fn record_org_failure(&mut self, name: &str, step: String, cause: RoostError) -> RoostError {
        error!(org = %name, step = %step, error = %cause, "Organization setup failed");
        let mut kind = OrgKind::Member;
        if let Some(org) = self.descriptor.org_mut(name) {
            org.status = OrgStatus::Failed { step: step.clone() };
            kind = org.kind;
        }
        // The failed authority drops out of the topology; its volume stays.
        if let Err(e) = self.write_compose().and_then(|_| self.descriptor.save()) {
            return e;
        }
        RoostError::OrganizationFailed {
            name: name.to_string(),
            step,
            retry: retry_command(kind).to_string(),
        }
    }

    /// Organization that new nodes are attached to
    fn node_org(&self, name: Option<&str>) -> Result<Organization> {
        let org = match name {
            Some(name) => self.descriptor.org(name).ok_or_else(|| {
                RoostError::prerequisite(format!(
                    "organization '{}' does not exist; run add-org first",
                    name
                ))
            })?,
            None => self.descriptor.default_node_org().ok_or_else(|| {
                RoostError::prerequisite("no root organization; run init first")
            })?,
        };
        match &org.status {
            OrgStatus::Ready => Ok(org.clone()),
            OrgStatus::Failed { step } => Err(RoostError::OrganizationFailed {
                name: org.name.clone(),
                step: step.clone(),
                retry: retry_command(org.kind).to_string(),
            }),
            OrgStatus::Pending => Err(RoostError::prerequisite(format!(
                "organization '{}' has not finished enrollment",
                org.name
            ))),
        }
    }

    fn write_compose(&self) -> Result<PathBuf> {
        let compose = topology::build(&self.descriptor, &self.config.images);
        topology::write(&self.descriptor, &compose)
    }

    /// Rewrite the compose file after a structural change
    fn refresh_topology(&mut self) -> Result<()> {
        self.write_compose()?;
        if self.descriptor.state >= NetworkState::OrganizationsReady {
            self.descriptor.advance(NetworkState::TopologyGenerated);
        }
        Ok(())
    }

    async fn pull_best_effort(&self, image: &str) {
        if let Err(e) = self.compose.pull_image(image).await {
            warn!(image = %image, error = %e, "Could not pull image, relying on a local copy");
        }
    }

    /// Create the root authority and the requested nodes under a fresh base path
    ///
    /// A base path whose root authority never became ready is taken over:
    /// the chain restarts at its first step with the recorded names.
    pub async fn init(&mut self, request: InitRequest) -> Result<()> {
        let span = self.span.clone();
        async move {
            let base = self.descriptor.base_path.clone();
            let unfinished = if base.exists() {
                match NetworkDescriptor::load(&base) {
                    Ok(previous) if previous.state == NetworkState::Uninitialized => Some(previous),
                    _ => {
                        return Err(RoostError::validation(format!(
                            "base path '{}' already exists; remove it or choose another --base-path",
                            base.display()
                        )))
                    }
                }
            } else {
                None
            };
            let password = identity::validate_root_password(request.admin_password.as_deref())?;
            match self.toolchain.bin_dir() {
                Some(dir) if dir.is_dir() => {}
                Some(dir) => {
                    return Err(RoostError::validation(format!(
                        "binaries path '{}' is not a directory",
                        dir.display()
                    )))
                }
                None => {
                    return Err(RoostError::validation(format!(
                        "{} must point at the directory holding the ledger binaries",
                        BIN_PATH_ENV
                    )))
                }
            }
            if request.peers > 0 {
                validate_count(NodeKind::Peer, 0, request.peers)?;
            }
            if request.orderers > 0 {
                validate_count(NodeKind::Orderer, 0, request.orderers)?;
            }
            if let Some(org) = &request.organization {
                if org.name.trim().is_empty() || org.domain.trim().is_empty() {
                    return Err(RoostError::validation(
                        "organization name and domain must not be empty",
                    ));
                }
            }

            if let Some(previous) = unfinished {
                warn!(
                    base = %base.display(),
                    network = %previous.network_name,
                    "Resuming an initialization that did not finish"
                );
                self.descriptor = previous;
                if self.descriptor.path(COMPOSE_FILE).exists() {
                    // A root authority container may still hold the old server state.
                    if let Err(e) = self.compose.down(false).await {
                        warn!(error = %e, "Could not remove containers of the earlier attempt");
                    }
                }
            }
            // stack.json exists from here on; a rerun resumes from it.
            self.descriptor.save()?;

            info!(
                base = %base.display(),
                network = %self.descriptor.network_name,
                peers = request.peers,
                orderers = request.orderers,
                "Initializing network"
            );
            let chain = self.identity_chain();
            let mut root = chain.bootstrap_root_authority(&password).await?;
            let root_name = root.name.clone();
            self.put_org(0, root.clone());
            self.descriptor.save()?;

            if let Err(e) = self.start_ca(&root_name).await {
                return Err(self.record_org_failure(&root_name, steps::START_ROOT_CA.to_string(), e));
            }
            if let Err(e) = chain.enroll_root_admin(&mut root, &password).await {
                return Err(self.record_org_failure(&root_name, steps::ENROLL_TLS_ADMIN.to_string(), e));
            }
            artifacts::create_msp(&self.descriptor, &root, &root.crypto_path.join("msp"))?;
            root.status = OrgStatus::Ready;
            self.put_org(0, root);
            self.descriptor.advance(NetworkState::RootAuthorityReady);
            self.descriptor.advance(NetworkState::OrganizationsReady);
            self.descriptor.save()?;
            info!(org = %root_name, "Root authority ready");

            let node_org = match &request.organization {
                Some(org) => {
                    self.add_organization(&org.name, &org.domain, org.identifier.as_deref())
                        .await?;
                    Some(org.name.as_str())
                }
                None => None,
            };
            if request.peers > 0 {
                self.add_peers(request.peers, node_org).await?;
            }
            if request.orderers > 0 {
                self.add_orderers(request.orderers, node_org).await?;
            }
            self.generate_compose()?;

            if request.start {
                self.start_network().await?;
                if request.peers > 0 && request.orderers > 0 {
                    self.create_channel(None).await?;
                }
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Bring up one organization's authority and wait for its certificate
    pub async fn start_ca(&self, org_name: &str) -> Result<()> {
        let org = self.descriptor.org(org_name).cloned().ok_or_else(|| {
            RoostError::prerequisite(format!("organization '{}' does not exist", org_name))
        })?;
        self.write_compose()?;
        self.pull_best_effort(&self.config.images.ca).await;
        self.compose.up(&[org.ca_service()]).await?;

        let cert = self.descriptor.path(&org.crypto_path).join(CA_CERT_FILE);
        let readiness = &self.config.readiness;
        let policy = PollPolicy::new(readiness.ca_timeout(), readiness.ca_poll());
        wait_for_file(&cert, policy, &self.cancel).await?;
        info!(org = %org.name, port = org.ca.port, "Certificate authority ready");
        Ok(())
    }

    /// Create a member organization with its own authority
    ///
    /// An organization that failed part-way is recreated from its
    /// registration step, keeping its position and authority port.
    pub async fn add_organization(
        &mut self,
        name: &str,
        domain: &str,
        identifier: Option<&str>,
    ) -> Result<()> {
        let span = self.span.clone();
        async move {
            self.descriptor
                .require_state(NetworkState::RootAuthorityReady, "adding an organization")?;
            if name.trim().is_empty() || domain.trim().is_empty() {
                return Err(RoostError::validation("organization name and domain must not be empty"));
            }
            let identifier = identifier.unwrap_or(name).to_string();
            let root = self
                .descriptor
                .root_org()
                .cloned()
                .ok_or_else(|| RoostError::prerequisite("no root organization; run init first"))?;
            if root.name == name {
                return Err(RoostError::validation(format!(
                    "'{}' is the root organization",
                    name
                )));
            }
            if !root.is_ready() {
                return Err(RoostError::prerequisite(format!(
                    "root organization '{}' is not ready",
                    root.name
                )));
            }

            let index = match self.descriptor.organizations.iter().position(|o| o.name == name) {
                Some(i) if self.descriptor.organizations[i].is_ready() => {
                    return Err(RoostError::validation(format!(
                        "organization '{}' already exists",
                        name
                    )))
                }
                Some(i) => {
                    warn!(org = %name, "Recreating organization that did not finish enrollment");
                    i
                }
                None => self.descriptor.organizations.len(),
            };

            self.start_ca(&root.name).await?;

            let chain = self.identity_chain();
            let pending = chain.pending_member(name, domain, &identifier, index)?;
            self.put_org(index, pending);
            self.descriptor.save()?;
            info!(org = %name, domain = %domain, "Adding organization");

            let bootstrap = match chain.register_bootstrap_identity(&root, &identifier).await {
                Ok(bootstrap) => bootstrap,
                Err(e) => {
                    let step = failed_step(&e, steps::REGISTER_BOOTSTRAP);
                    return Err(self.record_org_failure(name, step, e));
                }
            };
            let mut org = match chain
                .create_org_authority(name, domain, &identifier, index, &bootstrap)
                .await
            {
                Ok(org) => org,
                Err(e) => return Err(self.record_org_failure(name, steps::INIT_ORG_CA.to_string(), e)),
            };
            self.put_org(index, org.clone());
            self.descriptor.save()?;

            if let Err(e) = self.start_ca(name).await {
                return Err(self.record_org_failure(name, steps::START_ORG_CA.to_string(), e));
            }
            if let Err(e) = chain.enroll_org_admin(&mut org).await {
                return Err(self.record_org_failure(name, steps::ENROLL_ORG_ADMIN.to_string(), e));
            }
            artifacts::create_msp(&self.descriptor, &org, &org.crypto_path.join("msp"))?;

            org.status = OrgStatus::Ready;
            self.put_org(index, org);
            self.descriptor.mark_structural_change();
            self.descriptor.advance(NetworkState::OrganizationsReady);
            self.refresh_topology()?;
            self.descriptor.save()?;
            info!(org = %name, "Organization ready");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Append `count` peers to an organization (the root one by default)
    pub async fn add_peers(&mut self, count: usize, org: Option<&str>) -> Result<()> {
        let span = self.span.clone();
        async move {
            self.descriptor
                .require_state(NetworkState::OrganizationsReady, "adding peers")?;
            let org = self.node_org(org)?;
            validate_count(NodeKind::Peer, self.descriptor.peers.len(), count)?;

            let first = self.descriptor.peers.len();
            for index in first..first + count {
                let name = format!("peer{}", index);
                let gossip_bootstrap = self
                    .descriptor
                    .peers
                    .iter()
                    .find(|p| p.org == org.name)
                    .map(|p| format!("{}.{}:{}", p.name, org.domain, p.ports.main));
                let peer = PeerNode {
                    msp_path: node_msp_path(&org, "peers", &name),
                    name,
                    org: org.name.clone(),
                    ports: peer_ports(index)?,
                    msp_id: org.msp_id.clone(),
                    tls_enabled: true,
                    gossip_bootstrap,
                    joined: false,
                };
                artifacts::create_msp(&self.descriptor, &org, &peer.msp_path)?;
                artifacts::write_peer_config(
                    &self.descriptor,
                    &peer,
                    self.config.templates.core.as_deref(),
                )?;
                info!(peer = %peer.name, org = %org.name, port = peer.ports.main, "Peer added");
                self.descriptor.peers.push(peer);
                self.descriptor.mark_structural_change();
                self.descriptor.save()?;
            }

            self.refresh_topology()?;
            self.descriptor.save()
        }
        .instrument(span)
        .await
    }

    /// Append `count` orderers; refused once the channel has members
    pub async fn add_orderers(&mut self, count: usize, org: Option<&str>) -> Result<()> {
        let span = self.span.clone();
        async move {
            self.descriptor
                .require_state(NetworkState::OrganizationsReady, "adding orderers")?;
            if self.descriptor.channel_has_members() {
                return Err(RoostError::validation(format!(
                    "nodes have already joined channel '{}'; its consenter set is fixed",
                    self.descriptor.channel_name
                )));
            }
            let org = self.node_org(org)?;
            validate_count(NodeKind::Orderer, self.descriptor.orderers.len(), count)?;

            let first = self.descriptor.orderers.len();
            for index in first..first + count {
                let name = format!("orderer{}", index);
                let orderer = OrdererNode {
                    msp_path: node_msp_path(&org, "orderers", &name),
                    name,
                    org: org.name.clone(),
                    ports: orderer_ports(index)?,
                    msp_id: org.msp_id.clone(),
                    tls_enabled: true,
                    consensus: self.descriptor.channel.orderer_type.clone(),
                    joined: false,
                };
                artifacts::create_msp(&self.descriptor, &org, &orderer.msp_path)?;
                artifacts::write_orderer_config(
                    &self.descriptor,
                    &orderer,
                    self.config.templates.orderer.as_deref(),
                )?;
                info!(
                    orderer = %orderer.name,
                    org = %org.name,
                    port = orderer.ports.main,
                    admin = orderer.ports.secondary,
                    "Orderer added"
                );
                self.descriptor.orderers.push(orderer);
                self.descriptor.mark_structural_change();
                self.descriptor.save()?;
            }

            std::fs::create_dir_all(
                self.descriptor
                    .path(&org.crypto_path)
                    .join("system-genesis-block"),
            )?;
            // Consenters changed; any earlier block no longer matches.
            self.descriptor.channel.consenters.clear();
            self.descriptor.channel.genesis_block = None;

            self.refresh_topology()?;
            self.descriptor.save()
        }
        .instrument(span)
        .await
    }

    /// Rebuild `docker-compose.yml` from the descriptor
    pub fn generate_compose(&mut self) -> Result<PathBuf> {
        let _guard = self.span.enter();
        self.descriptor
            .require_state(NetworkState::OrganizationsReady, "generating the topology")?;
        let path = self.write_compose()?;
        self.descriptor.advance(NetworkState::TopologyGenerated);
        self.descriptor.save()?;
        Ok(path)
    }

    /// Start every ready authority, then the remaining services
    pub async fn start_network(&mut self) -> Result<()> {
        let span = self.span.clone();
        async move {
            self.descriptor
                .require_state(NetworkState::TopologyGenerated, "starting the network")?;
            self.write_compose()?;

            let authorities: Vec<String> = self
                .descriptor
                .organizations
                .iter()
                .filter(|o| o.is_ready())
                .map(|o| o.name.clone())
                .collect();
            for org in &authorities {
                self.start_ca(org).await?;
            }

            if !self.descriptor.orderers.is_empty() {
                self.pull_best_effort(&self.config.images.orderer).await;
            }
            if !self.descriptor.peers.is_empty() {
                self.pull_best_effort(&self.config.images.peer).await;
            }
            self.compose.up(&[]).await?;

            self.descriptor.advance(NetworkState::ContainersRunning);
            self.descriptor.save()?;
            info!(network = %self.descriptor.network_name, "Network started");
            Ok(())
        }
        .instrument(span)
        .await
    }

    pub async fn stop(&mut self) -> Result<()> {
        let span = self.span.clone();
        async move {
            self.descriptor
                .require_state(NetworkState::TopologyGenerated, "stopping the network")?;
            self.compose.stop().await?;
            self.descriptor.containers_stopped();
            self.descriptor.save()
        }
        .instrument(span)
        .await
    }

    /// Remove the containers, and the declared volumes with `volumes`
    pub async fn down(&mut self, volumes: bool) -> Result<()> {
        let span = self.span.clone();
        async move {
            self.descriptor
                .require_state(NetworkState::TopologyGenerated, "removing the network")?;
            self.compose.down(volumes).await?;
            self.descriptor.containers_stopped();
            self.descriptor.save()
        }
        .instrument(span)
        .await
    }

    /// Stream service logs; cancellation ends a follow session cleanly
    pub async fn logs(&self, follow: bool, services: &[String], sink: LineSink) -> Result<()> {
        self.descriptor
            .require_state(NetworkState::TopologyGenerated, "reading logs")?;
        match self
            .compose
            .logs(follow, services, sink)
            .instrument(self.span.clone())
            .await
        {
            Ok(_) | Err(RoostError::Cancelled { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Write the channel configuration and produce the genesis block
    pub async fn generate_channel_artifacts(&mut self) -> Result<PathBuf> {
        let span = self.span.clone();
        async move {
            channel::require_orderers(&self.descriptor)?;
            self.descriptor
                .require_state(NetworkState::OrganizationsReady, "generating channel artifacts")?;

            channel::write_configtx(&self.descriptor, self.config.templates.configtx.as_deref())?;
            let block = channel::block_path(&self.descriptor);
            let block_file = self.descriptor.path(&block);
            if let Some(parent) = block_file.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let genesis = channel::genesis_command(&self.descriptor, &self.toolchain);
            info!(channel = %self.descriptor.channel_name, "Generating genesis block");
            self.runner.run_checked(&genesis, &self.cancel).await?;
            if !block_file.exists() {
                return Err(RoostError::MalformedDocument {
                    path: block_file,
                    message: "configtxgen exited successfully but wrote no block".to_string(),
                });
            }

            self.descriptor.channel.consenters = channel::consenters(&self.descriptor)?;
            self.descriptor.channel.genesis_block = Some(block);
            if self.descriptor.state >= NetworkState::ContainersRunning {
                self.descriptor.advance(NetworkState::ChannelArtifactsGenerated);
            }
            self.descriptor.save()?;
            Ok(block_file)
        }
        .instrument(span)
        .await
    }

    /// Generate (or reuse) the genesis block and join every node not yet joined
    pub async fn create_channel(&mut self, channel_name: Option<&str>) -> Result<()> {
        let span = self.span.clone();
        async move {
            // All checks run before the descriptor is touched.
            channel::require_orderers(&self.descriptor)?;
            channel::require_peers(&self.descriptor)?;
            self.descriptor
                .require_state(NetworkState::ContainersRunning, "channel formation")?;

            if let Some(requested) = channel_name.filter(|c| *c != self.descriptor.channel_name) {
                if self.descriptor.channel_has_members() {
                    return Err(RoostError::validation(format!(
                        "nodes have already joined channel '{}'; cannot switch to '{}'",
                        self.descriptor.channel_name, requested
                    )));
                }
                info!(from = %self.descriptor.channel_name, to = %requested, "Renaming channel");
                self.descriptor.channel_name = requested.to_string();
                self.descriptor.channel.name = requested.to_string();
                self.descriptor.channel.genesis_block = None;
                self.descriptor.save()?;
                self.write_compose()?;
            }

            let existing = self
                .descriptor
                .channel
                .genesis_block
                .clone()
                .filter(|b| self.descriptor.path(b).exists());
            let block = match existing {
                Some(block) if self.descriptor.channel_has_members() => {
                    info!(block = %block.display(), "Reusing genesis block");
                    block
                }
                _ => {
                    self.generate_channel_artifacts().await?;
                    channel::block_path(&self.descriptor)
                }
            };

            self.form_channel(&block).await
        }
        .instrument(span)
        .await
    }

    async fn form_channel(&mut self, block: &Path) -> Result<()> {
        let readiness = self.config.readiness.clone();
        let pending_orderers: Vec<usize> = (0..self.descriptor.orderers.len())
            .filter(|&i| !self.descriptor.orderers[i].joined)
            .collect();
        let pending_peers: Vec<usize> = (0..self.descriptor.peers.len())
            .filter(|&i| !self.descriptor.peers[i].joined)
            .collect();

        if !pending_orderers.is_empty() {
            let policy = PollPolicy::new(readiness.orderer_timeout(), readiness.orderer_poll());
            for &i in &pending_orderers {
                let addr = format!("localhost:{}", self.descriptor.orderers[i].ports.secondary);
                wait_for_tcp(&addr, readiness.connect_timeout(), policy, &self.cancel).await?;
            }
            self.cancel
                .sleep(readiness.orderer_grace(), "waiting for orderers to settle")
                .await?;
        }

        for i in pending_orderers {
            self.cancel.check("joining orderers")?;
            let orderer = &self.descriptor.orderers[i];
            let join = channel::orderer_join_command(&self.descriptor, &self.toolchain, orderer, block);
            self.runner.run_checked(&join, &self.cancel).await?;
            self.descriptor.orderers[i].joined = true;
            self.descriptor.save()?;
            info!(
                orderer = %self.descriptor.orderers[i].name,
                channel = %self.descriptor.channel_name,
                "Orderer joined channel"
            );
        }

        for i in pending_peers {
            self.cancel.check("joining peers")?;
            let peer = &self.descriptor.peers[i];
            let join = channel::peer_join_command(&self.descriptor, &self.toolchain, peer, block)?;
            self.runner.run_checked(&join, &self.cancel).await?;
            self.descriptor.peers[i].joined = true;
            self.descriptor.save()?;
            info!(
                peer = %self.descriptor.peers[i].name,
                channel = %self.descriptor.channel_name,
                "Peer joined channel"
            );
        }

        self.descriptor.advance(NetworkState::ChannelFormed);
        self.descriptor.save()?;
        info!(channel = %self.descriptor.channel_name, "Channel formed");
        Ok(())
    }
}
