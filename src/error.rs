// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for Kea-Roost

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for Kea-Roost operations
pub type Result<T> = std::result::Result<T, RoostError>;

/// Errors that can occur while building or operating a network
#[derive(Error, Debug)]
pub enum RoostError {
    /// Operator input or environment rejected before any side effect
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// An operation was invoked before the step it depends on
    #[error("{message}")]
    MissingPrerequisite { message: String },

    /// An external binary exited unsuccessfully
    #[error("Step '{step}' failed: {program} exited with {status}: {stderr}")]
    ProcessFailed {
        step: String,
        program: String,
        status: String,
        stderr: String,
    },

    /// An external binary could not be started at all
    #[error("Step '{step}' could not start {program}: {source}")]
    ProcessSpawn {
        step: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A readiness wait exhausted its bound
    #[error("Timed out after {bound:?} waiting for {target}")]
    ReadinessTimeout { target: String, bound: Duration },

    /// A suspension point observed the cancellation signal
    #[error("Cancelled while {during}")]
    Cancelled { during: String },

    /// Organization is recorded but its enrollment chain did not finish
    #[error("Organization '{name}' failed at step '{step}'; re-run {retry} to recreate it")]
    OrganizationFailed {
        name: String,
        step: String,
        /// Command that resumes this organization's chain
        retry: String,
    },

    /// No persisted descriptor at the base path
    #[error("Network descriptor not found: {path}")]
    DescriptorNotFound { path: PathBuf },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Generated or patched file was malformed
    #[error("Malformed document '{path}': {message}")]
    MalformedDocument { path: PathBuf, message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl RoostError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn prerequisite(message: impl Into<String>) -> Self {
        Self::MissingPrerequisite {
            message: message.into(),
        }
    }

    /// True for the dependency-ordering class of failures
    pub fn is_missing_prerequisite(&self) -> bool {
        matches!(self, Self::MissingPrerequisite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_failed_message_carries_step_and_stderr() {
        let err = RoostError::ProcessFailed {
            step: "enroll-tls-admin".to_string(),
            program: "fabric-ca-client".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("enroll-tls-admin"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_prerequisite_message_is_verbatim() {
        let err = RoostError::prerequisite("no orderers configured - add at least one orderer first");
        assert!(err.is_missing_prerequisite());
        assert_eq!(
            err.to_string(),
            "no orderers configured - add at least one orderer first"
        );
    }

    #[test]
    fn test_failed_organization_names_the_retry_command() {
        let err = RoostError::OrganizationFailed {
            name: "pm3_org_tls".to_string(),
            step: "enroll-tls-admin".to_string(),
            retry: "init".to_string(),
        };
        assert!(err.to_string().ends_with("re-run init to recreate it"));
    }

    #[test]
    fn test_timeout_is_not_a_process_error() {
        let err = RoostError::ReadinessTimeout {
            target: "ca-cert.pem".to_string(),
            bound: Duration::from_secs(30),
        };
        assert!(!err.is_missing_prerequisite());
        assert!(err.to_string().contains("30s"));
    }
}
