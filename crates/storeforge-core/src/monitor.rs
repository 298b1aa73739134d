use crate::config::WorkloadNames;
use std::sync::Arc;
use std::time::Duration;
use storeforge_runtime::{ClusterBackend, RuntimeError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one readiness poll.
#[derive(Debug, PartialEq, Eq)]
enum Probe {
    Ready,
    Waiting(String),
}

/// Polls a namespace at a fixed interval until every readiness check passes
/// or the deadline elapses.
pub struct ReadinessMonitor {
    cluster: Arc<dyn ClusterBackend>,
    workloads: WorkloadNames,
    poll_interval: Duration,
    http_probe_timeout: Option<Duration>,
}

impl ReadinessMonitor {
    pub fn new(
        cluster: Arc<dyn ClusterBackend>,
        workloads: WorkloadNames,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cluster,
            workloads,
            poll_interval,
            http_probe_timeout: None,
        }
    }

    /// Also require the store's ingress host to answer HTTP with a status below 500.
    #[must_use]
    pub fn with_http_probe(mut self, timeout: Duration) -> Self {
        self.http_probe_timeout = Some(timeout);
        self
    }

    /// `true` on the first fully healthy poll, `false` once `timeout` has
    /// elapsed. Check failures count as "not ready" for that poll.
    pub async fn wait_for_ready(&self, namespace: &str, timeout: Duration) -> bool {
        let start = Instant::now();
        info!(namespace, timeout_secs = timeout.as_secs(), "waiting for store readiness");

        while start.elapsed() < timeout {
            match self.poll(namespace).await {
                Ok(Probe::Ready) => {
                    info!(
                        namespace,
                        elapsed_secs = start.elapsed().as_secs(),
                        "store is ready"
                    );
                    return true;
                }
                Ok(Probe::Waiting(reason)) => debug!(namespace, "not ready: {reason}"),
                Err(e) => warn!(namespace, "readiness check failed: {e}"),
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        warn!(namespace, timeout_secs = timeout.as_secs(), "store did not become ready in time");
        false
    }

    async fn poll(&self, namespace: &str) -> Result<Probe, RuntimeError> {
        if !self.cluster.namespace_exists(namespace).await? {
            return Ok(Probe::Waiting("namespace does not exist".to_owned()));
        }

        let deployment = self
            .cluster
            .deployment_readiness(namespace, &self.workloads.deployment)
            .await?;
        if !deployment.is_rolled_out() {
            return Ok(Probe::Waiting(format!(
                "deployment {} has {}/{} ready replicas",
                self.workloads.deployment, deployment.ready, deployment.desired
            )));
        }

        let stateful_set = self
            .cluster
            .stateful_set_readiness(namespace, &self.workloads.stateful_set)
            .await?;
        if !stateful_set.is_rolled_out() {
            return Ok(Probe::Waiting(format!(
                "statefulset {} has {}/{} ready replicas",
                self.workloads.stateful_set, stateful_set.ready, stateful_set.desired
            )));
        }

        let pods = self.cluster.list_pods(namespace).await?;
        if pods.is_empty() {
            return Ok(Probe::Waiting("no pods yet".to_owned()));
        }
        if let Some(pod) = pods.iter().find(|p| !p.ready) {
            return Ok(Probe::Waiting(format!("pod {} is not ready", pod.name)));
        }

        if let Some(timeout) = self.http_probe_timeout {
            return self.probe_http(namespace, timeout).await;
        }

        Ok(Probe::Ready)
    }

    async fn probe_http(&self, namespace: &str, timeout: Duration) -> Result<Probe, RuntimeError> {
        let Some(host) = self
            .cluster
            .ingress_host(namespace, &self.workloads.ingress)
            .await?
        else {
            return Ok(Probe::Waiting(format!(
                "ingress {} has no host",
                self.workloads.ingress
            )));
        };

        let url = format!("http://{host}");
        let status = tokio::task::spawn_blocking(move || http_status(&url, timeout))
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("http probe task failed: {e}")))?;

        Ok(match status {
            Ok(code) if code < 500 => Probe::Ready,
            Ok(code) => Probe::Waiting(format!("http probe returned {code}")),
            Err(e) => Probe::Waiting(format!("http probe failed: {e}")),
        })
    }
}

fn http_status(url: &str, timeout: Duration) -> Result<u16, ureq::Error> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();
    match agent.get(url).call() {
        Ok(resp) => Ok(resp.status().as_u16()),
        Err(ureq::Error::StatusCode(code)) => Ok(code),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storeforge_runtime::{MockCluster, ReadinessScript};

    fn monitor(cluster: &Arc<MockCluster>) -> ReadinessMonitor {
        ReadinessMonitor::new(
            Arc::clone(cluster) as Arc<dyn ClusterBackend>,
            WorkloadNames::default(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn missing_namespace_is_waiting() {
        let cluster = Arc::new(MockCluster::new());
        let probe = monitor(&cluster).poll("store-none").await.unwrap();
        assert_eq!(probe, Probe::Waiting("namespace does not exist".to_owned()));
        assert_eq!(cluster.call_count("deployment_readiness"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn checks_short_circuit_on_first_failure() {
        let cluster = Arc::new(MockCluster::with_readiness(ReadinessScript::Never));
        cluster.insert_namespace("store-a");
        let probe = monitor(&cluster).poll("store-a").await.unwrap();
        assert!(matches!(probe, Probe::Waiting(ref r) if r.starts_with("deployment wordpress")));
        assert_eq!(cluster.call_count("stateful_set_readiness"), 0);
        assert_eq!(cluster.call_count("list_pods"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn http_probe_without_ingress_host_waits() {
        let cluster = Arc::new(MockCluster::new());
        cluster.insert_namespace("store-b");
        let m = monitor(&cluster).with_http_probe(Duration::from_secs(5));
        let probe = m.poll("store-b").await.unwrap();
        assert!(matches!(probe, Probe::Waiting(ref r) if r.contains("no host")));
    }

    /// Answers every request with `status` until dropped.
    struct StatusServer {
        server: Arc<tiny_http::Server>,
        host: String,
        worker: Option<std::thread::JoinHandle<()>>,
    }

    impl StatusServer {
        fn start(status: u16) -> Self {
            let server = Arc::new(tiny_http::Server::http("127.0.0.1:0").unwrap());
            let port = server.server_addr().to_ip().unwrap().port();
            let worker = {
                let server = Arc::clone(&server);
                std::thread::spawn(move || {
                    for request in server.incoming_requests() {
                        let response = tiny_http::Response::empty(tiny_http::StatusCode(status));
                        let _ = request.respond(response);
                    }
                })
            };
            Self {
                server,
                host: format!("127.0.0.1:{port}"),
                worker: Some(worker),
            }
        }
    }

    impl Drop for StatusServer {
        fn drop(&mut self) {
            self.server.unblock();
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
    }

    fn probing_cluster(namespace: &str, host: &str) -> Arc<MockCluster> {
        let cluster = Arc::new(MockCluster::new());
        cluster.insert_namespace(namespace);
        cluster.set_ingress_host(namespace, host);
        cluster
    }

    fn probing_monitor(cluster: &Arc<MockCluster>) -> ReadinessMonitor {
        ReadinessMonitor::new(
            Arc::clone(cluster) as Arc<dyn ClusterBackend>,
            WorkloadNames::default(),
            Duration::from_millis(50),
        )
        .with_http_probe(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn http_probe_ok_is_ready() {
        let server = StatusServer::start(200);
        let cluster = probing_cluster("store-h", &server.host);
        let probe = probing_monitor(&cluster).poll("store-h").await.unwrap();
        assert_eq!(probe, Probe::Ready);
        assert_eq!(cluster.calls_to("ingress_host"), vec!["store-h".to_owned()]);
    }

    #[tokio::test]
    async fn http_probe_client_error_is_ready() {
        let server = StatusServer::start(404);
        let cluster = probing_cluster("store-i", &server.host);
        let probe = probing_monitor(&cluster).poll("store-i").await.unwrap();
        assert_eq!(probe, Probe::Ready);
    }

    #[tokio::test]
    async fn http_probe_server_error_is_waiting() {
        let server = StatusServer::start(503);
        let cluster = probing_cluster("store-j", &server.host);
        let m = probing_monitor(&cluster);
        let probe = m.poll("store-j").await.unwrap();
        assert_eq!(probe, Probe::Waiting("http probe returned 503".to_owned()));
        assert!(!m.wait_for_ready("store-j", Duration::from_millis(300)).await);
    }

    #[tokio::test]
    async fn http_probe_connection_refused_is_waiting() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let cluster = probing_cluster("store-k", &format!("127.0.0.1:{port}"));
        let probe = probing_monitor(&cluster).poll("store-k").await.unwrap();
        assert!(matches!(probe, Probe::Waiting(ref r) if r.starts_with("http probe failed")));
    }

    #[tokio::test]
    async fn http_probe_gates_wait_for_ready() {
        let server = StatusServer::start(200);
        let cluster = probing_cluster("store-l", &server.host);
        assert!(
            probing_monitor(&cluster)
                .wait_for_ready("store-l", Duration::from_secs(5))
                .await
        );
        assert_eq!(cluster.call_count("ingress_host"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_namespace_is_ready_on_first_poll() {
        let cluster = Arc::new(MockCluster::new());
        cluster.insert_namespace("store-c");
        let start = Instant::now();
        assert!(
            monitor(&cluster)
                .wait_for_ready("store-c", Duration::from_secs(60))
                .await
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(cluster.call_count("namespace_exists"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_never_polls() {
        let cluster = Arc::new(MockCluster::new());
        cluster.insert_namespace("store-d");
        assert!(!monitor(&cluster).wait_for_ready("store-d", Duration::ZERO).await);
        assert_eq!(cluster.total_calls(), 0);
    }
}
