use chrono::{DateTime, Utc};
use serde::Serialize;
use storeforge_runtime::{ClusterBackend, ContainerSnapshot, PodSnapshot};
use tracing::error;

/// Target carrying provisioning failure reports.
pub const PROVISIONING_LOG_TARGET: &str = "storeforge::provisioning";

#[derive(Debug, Clone, Serialize)]
pub struct PodDiagnostics {
    pub name: String,
    pub phase: Option<String>,
    pub ready: bool,
    pub containers: Vec<ContainerSnapshot>,
    /// Log tail, attached only for unhealthy pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

/// What the cluster looked like when a store failed to become ready.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub store_id: String,
    pub namespace: String,
    pub collected_at: DateTime<Utc>,
    pub pods: Vec<PodDiagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_error: Option<String>,
}

impl DiagnosticsReport {
    pub fn unhealthy_pods(&self) -> impl Iterator<Item = &PodDiagnostics> {
        self.pods.iter().filter(|p| p.logs.is_some())
    }
}

async fn diagnose_pod(
    cluster: &dyn ClusterBackend,
    namespace: &str,
    pod: PodSnapshot,
) -> PodDiagnostics {
    let logs = if pod.is_unhealthy() {
        Some(match cluster.pod_logs(namespace, &pod.name).await {
            Ok(logs) => logs,
            Err(e) => format!("failed to fetch logs: {e}"),
        })
    } else {
        None
    };
    PodDiagnostics {
        name: pod.name,
        phase: pod.phase,
        ready: pod.ready,
        containers: pod.containers,
        logs,
    }
}

/// Snapshot every pod in `namespace`, with logs for the unhealthy ones.
/// Failures are folded into the report.
pub async fn collect(
    cluster: &dyn ClusterBackend,
    store_id: &str,
    namespace: &str,
) -> DiagnosticsReport {
    let mut report = DiagnosticsReport {
        store_id: store_id.to_owned(),
        namespace: namespace.to_owned(),
        collected_at: Utc::now(),
        pods: Vec::new(),
        listing_error: None,
    };

    match cluster.list_pods(namespace).await {
        Ok(pods) => {
            for pod in pods {
                report.pods.push(diagnose_pod(cluster, namespace, pod).await);
            }
        }
        Err(e) => report.listing_error = Some(e.to_string()),
    }
    report
}

/// Write `report` as one JSON event on the provisioning target.
pub fn log_report(report: &DiagnosticsReport) {
    let json = serde_json::to_string(report)
        .unwrap_or_else(|e| format!("{{\"serialization_error\":\"{e}\"}}"));
    error!(
        target: PROVISIONING_LOG_TARGET,
        store_id = %report.store_id,
        namespace = %report.namespace,
        pods = report.pods.len(),
        report = %json,
        "store failed readiness; diagnostics collected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use storeforge_runtime::{MockCluster, ReadinessScript};

    #[tokio::test]
    async fn logs_attached_only_to_unhealthy_pods() {
        let cluster = MockCluster::with_readiness(ReadinessScript::Never);
        cluster.insert_namespace("store-a");
        let report = collect(&cluster, "a", "store-a").await;

        assert_eq!(report.pods.len(), 2);
        assert!(report.listing_error.is_none());
        let unhealthy: Vec<_> = report.unhealthy_pods().map(|p| p.name.as_str()).collect();
        assert_eq!(unhealthy, vec!["wordpress-0"]);
        assert_eq!(cluster.calls_to("pod_logs"), vec!["wordpress-0".to_owned()]);
    }

    #[tokio::test]
    async fn log_fetch_failure_is_recorded_inline() {
        let cluster = MockCluster::with_readiness(ReadinessScript::Never);
        cluster.insert_namespace("store-b");
        cluster.fail_pod_logs(Some("container not started"));
        let report = collect(&cluster, "b", "store-b").await;

        let wp = report.pods.iter().find(|p| p.name == "wordpress-0").unwrap();
        let logs = wp.logs.as_deref().unwrap();
        assert!(logs.starts_with("failed to fetch logs: "));
        assert!(logs.contains("container not started"));
    }

    #[tokio::test]
    async fn listing_failure_yields_error_report() {
        let cluster = MockCluster::new();
        cluster.fail_list_pods(Some("forbidden"));
        let report = collect(&cluster, "c", "store-c").await;
        assert!(report.pods.is_empty());
        assert!(report.listing_error.as_deref().unwrap().contains("forbidden"));
    }

    #[tokio::test]
    async fn report_serializes_container_states() {
        let cluster = MockCluster::with_readiness(ReadinessScript::Never);
        cluster.insert_namespace("store-d");
        let report = collect(&cluster, "d", "store-d").await;
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["namespace"], "store-d");
        assert!(json.get("listing_error").is_none());
        let wp = &json["pods"][0];
        assert_eq!(wp["containers"][0]["state"]["state"], "waiting");
        assert_eq!(wp["containers"][0]["state"]["reason"], "CrashLoopBackOff");
        assert!(json["pods"][1].get("logs").is_none());
        log_report(&report);
    }
}
