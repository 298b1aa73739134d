//! Cluster and package-installer capabilities for storeforge.
//!
//! This crate implements the execution layer the orchestrator drives: the
//! `ClusterBackend` trait with a Kubernetes implementation (`kube`), the
//! `PackageInstaller` trait with a Helm CLI implementation, scriptable mock
//! backends for tests and local demos, and prerequisite checks.
//!
//! Errors are categorized (`RuntimeError::AlreadyExists`, `RuntimeError::NotFound`, ...)
//! at the single point where each backend parses its transport's failure, so
//! callers can treat "already in the desired state" as success without
//! matching on message text.

pub mod cluster;
pub mod helm;
pub mod installer;
pub mod kubernetes;
pub mod mock;
pub mod prereq;

pub use cluster::{
    ClusterBackend, ContainerSnapshot, ContainerState, PodSnapshot, WorkloadReadiness,
};
pub use helm::{HelmConfig, HelmInstaller};
pub use installer::{PackageInstaller, ReleaseValues};
pub use kubernetes::KubeCluster;
pub use mock::{MockCluster, MockInstaller, ReadinessScript};
pub use prereq::{check_cluster_prereqs, check_helm_prereqs, format_missing, MissingPrereq};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("cluster API error: {0}")]
    Api(String),
    #[error("{operation} failed: {detail}")]
    CommandFailed { operation: String, detail: String },
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, RuntimeError::AlreadyExists { .. })
    }
}

/// Deployment environment. Selects the ingress suffix and the chart values file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Local,
}

impl Environment {
    /// `"production"` selects production; every other value is local.
    pub fn from_env_value(value: &str) -> Self {
        if value.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Local
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Local => write!(f, "local"),
        }
    }
}
