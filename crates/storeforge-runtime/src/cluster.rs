use crate::RuntimeError;
use async_trait::async_trait;
use serde::Serialize;

/// Replica counts of a deployment or stateful-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WorkloadReadiness {
    pub desired: i32,
    pub ready: i32,
}

impl WorkloadReadiness {
    /// Fully rolled out: every desired replica is ready, and at least one is desired.
    pub fn is_rolled_out(&self) -> bool {
        self.desired > 0 && self.ready == self.desired
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ContainerState {
    Waiting {
        reason: Option<String>,
        message: Option<String>,
    },
    Running,
    Terminated {
        exit_code: i32,
        reason: Option<String>,
    },
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSnapshot {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
    pub state: ContainerState,
}

/// Point-in-time view of one pod, reduced to what readiness and diagnostics need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodSnapshot {
    pub name: String,
    pub phase: Option<String>,
    /// The pod's `Ready` condition is `True`.
    pub ready: bool,
    pub containers: Vec<ContainerSnapshot>,
}

impl PodSnapshot {
    /// Not running, or any container not ready.
    pub fn is_unhealthy(&self) -> bool {
        self.phase.as_deref() != Some("Running") || self.containers.iter().any(|c| !c.ready)
    }
}

/// Cluster-management operations the orchestrator depends on.
///
/// `create_namespace` reports an existing namespace as `RuntimeError::AlreadyExists`
/// and `delete_namespace` a missing one as `RuntimeError::NotFound`; deciding
/// whether that is acceptable belongs to the caller.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn create_namespace(&self, name: &str) -> Result<(), RuntimeError>;

    async fn delete_namespace(&self, name: &str) -> Result<(), RuntimeError>;

    async fn namespace_exists(&self, name: &str) -> Result<bool, RuntimeError>;

    async fn deployment_readiness(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadReadiness, RuntimeError>;

    async fn stateful_set_readiness(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadReadiness, RuntimeError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSnapshot>, RuntimeError>;

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, RuntimeError>;

    /// Host of the first rule of the named ingress, if the ingress exists.
    async fn ingress_host(&self, namespace: &str, name: &str)
        -> Result<Option<String>, RuntimeError>;

    async fn check_connectivity(&self) -> bool;
}
