// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fake ledger toolchain for unit tests
//!
//! Imitates just enough of each binary's filesystem side effects for the
//! orchestration code to proceed: authority init writes a server config,
//! enrollment writes an MSP, `compose up` of an authority publishes its
//! certificate, `configtxgen` writes the block.

use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::error::Result;
use crate::runtime::{CommandOutput, CommandSpec};

const SAMPLE_CA_CONFIG: &str = r#"
version: 1.5.0
port: 7054
tls:
  enabled: false
  certfile: ""
  keyfile: ""
ca:
  name: ""
affiliations:
  org1:
    - department1
    - department2
signing:
  default:
    usage:
      - digital signature
    expiry: 8760h
  profiles:
    ca:
      usage:
        - cert sign
        - crl sign
      expiry: 43800h
      caconstraint:
        isca: true
        maxpathlen: 0
    tls:
      usage:
        - signing
        - key encipherment
        - server auth
        - client auth
      expiry: 8760h
csr:
  cn: fabric-ca-server
  hosts:
    - fake-host
  ca:
    expiry: 131400h
    pathlength: 1
"#;

fn flag_value<'a>(spec: &'a CommandSpec, flag: &str) -> Option<&'a str> {
    spec.args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| spec.args.get(i + 1))
        .map(String::as_str)
}

fn cwd(spec: &CommandSpec) -> PathBuf {
    spec.cwd.clone().unwrap_or_else(|| PathBuf::from("."))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

/// CA bind-mount source for each authority service named in `up`
fn publish_ca_certs(spec: &CommandSpec) -> Result<()> {
    let Some(file) = flag_value(spec, "-f") else {
        return Ok(());
    };
    let doc: Value = serde_yaml::from_str(&std::fs::read_to_string(file)?)?;
    let requested: Vec<&String> = match spec.args.iter().position(|a| a == "-d") {
        Some(i) => spec.args[i + 1..].iter().collect(),
        None => Vec::new(),
    };
    let Some(Value::Mapping(services)) = doc.get("services") else {
        return Ok(());
    };
    for (name, service) in services {
        let Some(name) = name.as_str() else { continue };
        if !name.ends_with("_ca") {
            continue;
        }
        if !requested.is_empty() && !requested.iter().any(|r| r.as_str() == name) {
            continue;
        }
        let volumes = service.get("volumes").and_then(Value::as_sequence);
        for volume in volumes.into_iter().flatten() {
            let Some(volume) = volume.as_str() else { continue };
            if let Some((host, "/etc/hyperledger/fabric-ca-server")) = volume.split_once(':') {
                write(&cwd(spec).join(host).join("ca-cert.pem"), "CERT")?;
            }
        }
    }
    Ok(())
}

/// Handler for [`crate::runtime::ScriptedRunner`] that always succeeds
pub(crate) fn fake_fabric(spec: &CommandSpec) -> Result<CommandOutput> {
    let program = spec.program_name();
    let sub = spec.args.first().map(String::as_str);

    match (program.as_str(), sub) {
        ("fabric-ca-server", Some("init")) => {
            let dir = cwd(spec);
            write(&dir.join("fabric-ca-server-config.yaml"), SAMPLE_CA_CONFIG)?;
            write(&dir.join("ca-cert.pem"), "INIT CERT")?;
            write(&dir.join("msp/keystore/init_sk"), "KEY")?;
        }
        ("fabric-ca-client", Some("enroll")) => {
            if let Some(msp) = flag_value(spec, "--mspdir") {
                let home = spec
                    .env_value("FABRIC_CA_CLIENT_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| cwd(spec));
                let msp = home.join(msp);
                write(&msp.join("keystore/0123abcd_sk"), "KEY")?;
                write(&msp.join("signcerts/cert.pem"), "CERT")?;
                write(&msp.join("cacerts/localhost-9000.pem"), "CA")?;
            }
        }
        ("docker", Some("compose")) if spec.args.iter().any(|a| a == "up") => {
            publish_ca_certs(spec)?;
        }
        ("configtxgen", _) => {
            if let Some(block) = flag_value(spec, "-outputBlock") {
                write(Path::new(block), "BLOCK")?;
            }
        }
        _ => {}
    }
    Ok(CommandOutput::ok())
}
