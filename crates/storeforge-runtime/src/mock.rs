use crate::cluster::{
    ClusterBackend, ContainerSnapshot, ContainerState, PodSnapshot, WorkloadReadiness,
};
use crate::installer::{PackageInstaller, ReleaseValues};
use crate::RuntimeError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How a `MockCluster` namespace progresses towards readiness.
///
/// Progress is counted in `namespace_exists` calls, which the readiness
/// monitor makes once per poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessScript {
    #[default]
    Healthy,
    /// Healthy from the k-th poll onwards.
    HealthyAfter(u32),
    /// Workloads never roll out and pods crash-loop.
    Never,
}

impl ReadinessScript {
    fn is_healthy_at(self, tick: u32) -> bool {
        match self {
            ReadinessScript::Healthy => true,
            ReadinessScript::HealthyAfter(k) => tick >= k,
            ReadinessScript::Never => false,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    ticks: HashMap<String, u32>,
    calls: Vec<(&'static str, String)>,
    readiness: ReadinessScript,
    create_namespace_error: Option<String>,
    delete_namespace_error: Option<String>,
    list_pods_error: Option<String>,
    pod_logs_error: Option<String>,
    ingress_hosts: HashMap<String, String>,
    disconnected: bool,
}

impl ClusterState {
    fn healthy(&self, namespace: &str) -> bool {
        let tick = self.ticks.get(namespace).copied().unwrap_or(0);
        self.readiness.is_healthy_at(tick)
    }

    fn require_namespace(
        &self,
        kind: &'static str,
        namespace: &str,
        name: &str,
    ) -> Result<(), RuntimeError> {
        if self.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound {
                kind,
                name: name.to_owned(),
            })
        }
    }
}

/// In-process `ClusterBackend` with scriptable readiness and error injection.
/// Every capability call is recorded.
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<ClusterState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_readiness(readiness: ReadinessScript) -> Self {
        let mock = Self::default();
        mock.set_readiness(readiness);
        mock
    }

    pub fn set_readiness(&self, readiness: ReadinessScript) {
        lock(&self.state).readiness = readiness;
    }

    pub fn fail_create_namespace(&self, message: Option<&str>) {
        lock(&self.state).create_namespace_error = message.map(str::to_owned);
    }

    pub fn fail_delete_namespace(&self, message: Option<&str>) {
        lock(&self.state).delete_namespace_error = message.map(str::to_owned);
    }

    pub fn fail_list_pods(&self, message: Option<&str>) {
        lock(&self.state).list_pods_error = message.map(str::to_owned);
    }

    pub fn fail_pod_logs(&self, message: Option<&str>) {
        lock(&self.state).pod_logs_error = message.map(str::to_owned);
    }

    pub fn set_ingress_host(&self, namespace: &str, host: &str) {
        lock(&self.state)
            .ingress_hosts
            .insert(namespace.to_owned(), host.to_owned());
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).disconnected = !connected;
    }

    /// Seed a namespace without recording a call.
    pub fn insert_namespace(&self, name: &str) {
        lock(&self.state).namespaces.insert(name.to_owned());
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        lock(&self.state).namespaces.contains(name)
    }

    pub fn call_count(&self, op: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .count()
    }

    /// Arguments of every recorded call to `op`, in call order.
    pub fn calls_to(&self, op: &str) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, arg)| arg.clone())
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.state).calls.len()
    }

    fn record(&self, op: &'static str, arg: &str) -> MutexGuard<'_, ClusterState> {
        let mut state = lock(&self.state);
        state.calls.push((op, arg.to_owned()));
        state
    }

    fn workload(
        &self,
        op: &'static str,
        kind: &'static str,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadReadiness, RuntimeError> {
        let state = self.record(op, namespace);
        state.require_namespace(kind, namespace, name)?;
        let ready = i32::from(state.healthy(namespace));
        Ok(WorkloadReadiness { desired: 1, ready })
    }
}

fn mock_pod(name: &str, healthy: bool) -> PodSnapshot {
    let state = if healthy {
        ContainerState::Running
    } else {
        ContainerState::Waiting {
            reason: Some("CrashLoopBackOff".to_owned()),
            message: Some("back-off restarting failed container".to_owned()),
        }
    };
    PodSnapshot {
        name: format!("{name}-0"),
        phase: Some(if healthy { "Running" } else { "Pending" }.to_owned()),
        ready: healthy,
        containers: vec![ContainerSnapshot {
            name: name.to_owned(),
            ready: healthy,
            restart_count: if healthy { 0 } else { 4 },
            state,
        }],
    }
}

#[async_trait]
impl ClusterBackend for MockCluster {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_namespace(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.record("create_namespace", name);
        if let Some(msg) = &state.create_namespace_error {
            return Err(RuntimeError::Api(msg.clone()));
        }
        if !state.namespaces.insert(name.to_owned()) {
            return Err(RuntimeError::AlreadyExists {
                kind: "namespace",
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.record("delete_namespace", name);
        if let Some(msg) = &state.delete_namespace_error {
            return Err(RuntimeError::Api(msg.clone()));
        }
        state.ticks.remove(name);
        if !state.namespaces.remove(name) {
            return Err(RuntimeError::NotFound {
                kind: "namespace",
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let mut state = self.record("namespace_exists", name);
        let exists = state.namespaces.contains(name);
        if exists {
            *state.ticks.entry(name.to_owned()).or_insert(0) += 1;
        }
        Ok(exists)
    }

    async fn deployment_readiness(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadReadiness, RuntimeError> {
        self.workload("deployment_readiness", "deployment", namespace, name)
    }

    async fn stateful_set_readiness(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadReadiness, RuntimeError> {
        self.workload("stateful_set_readiness", "statefulset", namespace, name)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSnapshot>, RuntimeError> {
        let state = self.record("list_pods", namespace);
        if let Some(msg) = &state.list_pods_error {
            return Err(RuntimeError::Api(msg.clone()));
        }
        if !state.namespaces.contains(namespace) {
            return Ok(Vec::new());
        }
        let healthy = state.healthy(namespace);
        Ok(vec![mock_pod("wordpress", healthy), mock_pod("mysql", true)])
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, RuntimeError> {
        let state = self.record("pod_logs", pod);
        if let Some(msg) = &state.pod_logs_error {
            return Err(RuntimeError::Api(msg.clone()));
        }
        state.require_namespace("pod", namespace, pod)?;
        Ok(format!("mock log output for {pod}\n"))
    }

    async fn ingress_host(
        &self,
        namespace: &str,
        _name: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let state = self.record("ingress_host", namespace);
        Ok(state.ingress_hosts.get(namespace).cloned())
    }

    async fn check_connectivity(&self) -> bool {
        !self.record("check_connectivity", "").disconnected
    }
}

#[derive(Default)]
struct InstallerState {
    /// release -> namespace
    releases: BTreeMap<String, String>,
    values: HashMap<String, ReleaseValues>,
    calls: Vec<(&'static str, String)>,
    install_error: Option<String>,
    uninstall_error: Option<String>,
    install_delay: Option<Duration>,
    unavailable: bool,
}

/// In-process `PackageInstaller` tracking releases in memory.
#[derive(Default)]
pub struct MockInstaller {
    state: Mutex<InstallerState>,
}

impl MockInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_install(&self, message: Option<&str>) {
        lock(&self.state).install_error = message.map(str::to_owned);
    }

    pub fn fail_uninstall(&self, message: Option<&str>) {
        lock(&self.state).uninstall_error = message.map(str::to_owned);
    }

    /// Make every `install` take `delay` (tokio time) before completing.
    pub fn set_install_delay(&self, delay: Option<Duration>) {
        lock(&self.state).install_delay = delay;
    }

    pub fn set_available(&self, available: bool) {
        lock(&self.state).unavailable = !available;
    }

    pub fn has_release(&self, release: &str) -> bool {
        lock(&self.state).releases.contains_key(release)
    }

    /// Values passed to the last successful install of `release`.
    pub fn installed_values(&self, release: &str) -> Option<ReleaseValues> {
        lock(&self.state).values.get(release).cloned()
    }

    pub fn call_count(&self, op: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.state).calls.len()
    }
}

#[async_trait]
impl PackageInstaller for MockInstaller {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn install(
        &self,
        release: &str,
        namespace: &str,
        values: &ReleaseValues,
    ) -> Result<(), RuntimeError> {
        let delay = {
            let mut state = lock(&self.state);
            state.calls.push(("install", release.to_owned()));
            state.install_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if let Some(msg) = &state.install_error {
            return Err(RuntimeError::CommandFailed {
                operation: "helm install".to_owned(),
                detail: msg.clone(),
            });
        }
        if state.releases.contains_key(release) {
            return Err(RuntimeError::CommandFailed {
                operation: "helm install".to_owned(),
                detail: format!("cannot re-use a name that is still in use: {release}"),
            });
        }
        state
            .releases
            .insert(release.to_owned(), namespace.to_owned());
        state.values.insert(release.to_owned(), values.clone());
        Ok(())
    }

    async fn uninstall(&self, release: &str, _namespace: &str) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        state.calls.push(("uninstall", release.to_owned()));
        if let Some(msg) = &state.uninstall_error {
            return Err(RuntimeError::CommandFailed {
                operation: "helm uninstall".to_owned(),
                detail: msg.clone(),
            });
        }
        state.values.remove(release);
        match state.releases.remove(release) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound {
                kind: "release",
                name: release.to_owned(),
            }),
        }
    }

    async fn status(
        &self,
        release: &str,
        _namespace: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let mut state = lock(&self.state);
        state.calls.push(("status", release.to_owned()));
        Ok(state
            .releases
            .contains_key(release)
            .then(|| "deployed".to_owned()))
    }

    async fn check_available(&self) -> bool {
        let mut state = lock(&self.state);
        state.calls.push(("check_available", String::new()));
        !state.unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(id: &str) -> ReleaseValues {
        ReleaseValues {
            store_id: id.to_owned(),
            db_password: "db".to_owned(),
            admin_password: "admin".to_owned(),
            ingress_host: format!("{id}.localhost"),
        }
    }

    #[tokio::test]
    async fn namespace_lifecycle_categorizes_errors() {
        let cluster = MockCluster::new();
        cluster.create_namespace("store-a").await.unwrap();
        assert!(cluster
            .create_namespace("store-a")
            .await
            .unwrap_err()
            .is_already_exists());
        assert!(cluster.namespace_exists("store-a").await.unwrap());

        cluster.delete_namespace("store-a").await.unwrap();
        assert!(cluster
            .delete_namespace("store-a")
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(cluster.call_count("delete_namespace"), 2);
    }

    #[tokio::test]
    async fn healthy_after_counts_existence_checks() {
        let cluster = MockCluster::with_readiness(ReadinessScript::HealthyAfter(3));
        cluster.insert_namespace("store-b");

        for _ in 0..2 {
            cluster.namespace_exists("store-b").await.unwrap();
            let d = cluster.deployment_readiness("store-b", "wordpress").await.unwrap();
            assert!(!d.is_rolled_out());
        }
        cluster.namespace_exists("store-b").await.unwrap();
        let d = cluster.deployment_readiness("store-b", "wordpress").await.unwrap();
        assert!(d.is_rolled_out());
        let pods = cluster.list_pods("store-b").await.unwrap();
        assert!(pods.iter().all(|p| p.ready));
    }

    #[tokio::test]
    async fn never_ready_pods_crash_loop() {
        let cluster = MockCluster::with_readiness(ReadinessScript::Never);
        cluster.insert_namespace("store-c");
        let pods = cluster.list_pods("store-c").await.unwrap();
        let wp = pods.iter().find(|p| p.name == "wordpress-0").unwrap();
        assert!(wp.is_unhealthy());
        assert!(matches!(
            &wp.containers[0].state,
            ContainerState::Waiting { reason: Some(r), .. } if r == "CrashLoopBackOff"
        ));
    }

    #[tokio::test]
    async fn workload_in_missing_namespace_is_not_found() {
        let cluster = MockCluster::new();
        let err = cluster
            .stateful_set_readiness("store-x", "mysql")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn injected_errors_surface() {
        let cluster = MockCluster::new();
        cluster.insert_namespace("store-d");
        cluster.fail_pod_logs(Some("logs unavailable"));
        let err = cluster.pod_logs("store-d", "wordpress-0").await.unwrap_err();
        assert!(err.to_string().contains("logs unavailable"));

        cluster.set_connected(false);
        assert!(!cluster.check_connectivity().await);
    }

    #[tokio::test]
    async fn installer_tracks_releases() {
        let installer = MockInstaller::new();
        installer.install("a", "store-a", &values("a")).await.unwrap();
        assert!(installer.has_release("a"));
        assert_eq!(
            installer.status("a", "store-a").await.unwrap().as_deref(),
            Some("deployed")
        );
        assert_eq!(installer.installed_values("a").unwrap().ingress_host, "a.localhost");
        assert!(installer.install("a", "store-a", &values("a")).await.is_err());

        installer.uninstall("a", "store-a").await.unwrap();
        assert!(installer
            .uninstall("a", "store-a")
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(installer.status("a", "store-a").await.unwrap(), None);
        assert_eq!(installer.call_count("uninstall"), 2);
    }

    #[tokio::test]
    async fn installer_failure_injection() {
        let installer = MockInstaller::new();
        installer.fail_install(Some("chart not found"));
        let err = installer.install("b", "store-b", &values("b")).await.unwrap_err();
        assert_eq!(err.to_string(), "helm install failed: chart not found");
        assert!(!installer.has_release("b"));

        installer.set_available(false);
        assert!(!installer.check_available().await);
    }

    #[tokio::test(start_paused = true)]
    async fn install_delay_uses_tokio_time() {
        let installer = MockInstaller::new();
        installer.set_install_delay(Some(Duration::from_secs(30)));
        let start = tokio::time::Instant::now();
        installer.install("c", "store-c", &values("c")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
