use crate::cluster::{
    ClusterBackend, ContainerSnapshot, ContainerState, PodSnapshot, WorkloadReadiness,
};
use crate::RuntimeError;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{self as corev1, Namespace, Pod};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Label marking namespaces created by storeforge.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const STORE_LABEL: &str = "storeforge.io/store";
const MANAGER_NAME: &str = "storeforge";

/// Lines of log tail fetched per pod for diagnostics.
const LOG_TAIL_LINES: i64 = 200;

/// `ClusterBackend` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the default kubeconfig / in-cluster configuration.
    pub async fn try_default() -> Result<Self, RuntimeError> {
        let client = Client::try_default().await.map_err(|e| {
            RuntimeError::Unavailable(format!("kubeconfig not found or invalid: {e}"))
        })?;
        info!("Kubernetes client initialized");
        Ok(Self::new(client))
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map HTTP conflicts and missing objects to their categories; everything
/// else is an opaque API failure.
fn map_kube_error(kind: &'static str, name: &str, err: kube::Error) -> RuntimeError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => RuntimeError::AlreadyExists {
            kind,
            name: name.to_owned(),
        },
        kube::Error::Api(ae) if ae.code == 404 => RuntimeError::NotFound {
            kind,
            name: name.to_owned(),
        },
        other => RuntimeError::Api(format!("{kind} '{name}': {other}")),
    }
}

fn managed_namespace(name: &str) -> Namespace {
    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_owned(), MANAGER_NAME.to_owned()),
        (STORE_LABEL.to_owned(), name.to_owned()),
    ]);
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

fn container_state(state: Option<&corev1::ContainerState>) -> ContainerState {
    let Some(state) = state else {
        return ContainerState::Unknown;
    };
    if let Some(waiting) = &state.waiting {
        return ContainerState::Waiting {
            reason: waiting.reason.clone(),
            message: waiting.message.clone(),
        };
    }
    if let Some(terminated) = &state.terminated {
        return ContainerState::Terminated {
            exit_code: terminated.exit_code,
            reason: terminated.reason.clone(),
        };
    }
    if state.running.is_some() {
        return ContainerState::Running;
    }
    ContainerState::Unknown
}

fn pod_snapshot(pod: &Pod) -> PodSnapshot {
    let name = pod
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| "unknown".to_owned());
    let status = pod.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        });
    let containers = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| ContainerSnapshot {
                    name: cs.name.clone(),
                    ready: cs.ready,
                    restart_count: cs.restart_count,
                    state: container_state(cs.state.as_ref()),
                })
                .collect()
        })
        .unwrap_or_default();

    PodSnapshot {
        name,
        phase: status.and_then(|s| s.phase.clone()),
        ready,
        containers,
    }
}

#[async_trait]
impl ClusterBackend for KubeCluster {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn create_namespace(&self, name: &str) -> Result<(), RuntimeError> {
        self.namespaces()
            .create(&PostParams::default(), &managed_namespace(name))
            .await
            .map_err(|e| map_kube_error("namespace", name, e))?;
        info!(namespace = name, "namespace created");
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), RuntimeError> {
        self.namespaces()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error("namespace", name, e))?;
        info!(namespace = name, "namespace deleted");
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let found = self
            .namespaces()
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error("namespace", name, e))?;
        Ok(found.is_some())
    }

    async fn deployment_readiness(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadReadiness, RuntimeError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("deployment", name, e))?;
        Ok(WorkloadReadiness {
            desired: deployment
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or(0),
            ready: deployment
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
        })
    }

    async fn stateful_set_readiness(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadReadiness, RuntimeError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let set = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("statefulset", name, e))?;
        Ok(WorkloadReadiness {
            desired: set.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
            ready: set
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
        })
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSnapshot>, RuntimeError> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error("namespace", namespace, e))?;
        debug!(namespace, count = pods.items.len(), "listed pods");
        Ok(pods.items.iter().map(pod_snapshot).collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, RuntimeError> {
        let params = LogParams {
            tail_lines: Some(LOG_TAIL_LINES),
            ..LogParams::default()
        };
        self.pods(namespace)
            .logs(pod, &params)
            .await
            .map_err(|e| map_kube_error("pod", pod, e))
    }

    async fn ingress_host(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let ingress = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error("ingress", name, e))?;
        Ok(ingress
            .and_then(|i| i.spec)
            .and_then(|s| s.rules)
            .and_then(|rules| rules.into_iter().next())
            .and_then(|rule| rule.host))
    }

    async fn check_connectivity(&self) -> bool {
        match self
            .namespaces()
            .list(&ListParams::default().limit(1))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("failed to reach Kubernetes API: {e}");
                false
            }
        }
    }
}
