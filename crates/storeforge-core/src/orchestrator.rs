use crate::concurrency::{ProvisionGate, ProvisionPermit};
use crate::config::OrchestratorConfig;
use crate::credentials::{new_password, new_store_id};
use crate::diagnostics;
use crate::lifecycle::validate_transition;
use crate::monitor::ReadinessMonitor;
use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use storeforge_runtime::{ClusterBackend, PackageInstaller, ReleaseValues, RuntimeError};
use storeforge_store::{
    RecordStore, StatusUpdate, StatusView, StoreError, StoreId, StoreRecord, StoreStatus,
    StoreType,
};
use tracing::{debug, error, info, warn};

/// Fresh ids drawn before giving up on finding an unused one.
const ID_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthChecks {
    pub records: bool,
    pub kubernetes: bool,
    pub helm: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub checks: HealthChecks,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.checks.records && self.checks.kubernetes && self.checks.helm
    }
}

/// A pipeline failure and whether cluster state may need rolling back.
struct PipelineFailure {
    error: CoreError,
    rollback: bool,
}

impl PipelineFailure {
    fn before_namespace(error: impl Into<CoreError>) -> Self {
        Self {
            error: error.into(),
            rollback: false,
        }
    }

    fn after_namespace(error: impl Into<CoreError>) -> Self {
        Self {
            error: error.into(),
            rollback: true,
        }
    }
}

struct Inner {
    config: OrchestratorConfig,
    records: Arc<dyn RecordStore>,
    cluster: Arc<dyn ClusterBackend>,
    installer: Arc<dyn PackageInstaller>,
    monitor: ReadinessMonitor,
    gate: ProvisionGate,
    /// Serializes admission, and the status check plus write that claims a
    /// store for deletion, against other requests.
    admission: Mutex<()>,
}

/// Drives store provisioning and deletion against the cluster.
///
/// Cheap to clone; clones share admission state and in-flight accounting.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        records: Arc<dyn RecordStore>,
        cluster: Arc<dyn ClusterBackend>,
        installer: Arc<dyn PackageInstaller>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let mut monitor = ReadinessMonitor::new(
            Arc::clone(&cluster),
            config.workloads.clone(),
            config.poll_interval,
        );
        if config.http_probe {
            monitor = monitor.with_http_probe(config.http_probe_timeout);
        }
        info!(
            cluster = cluster.name(),
            installer = installer.name(),
            environment = %config.environment,
            max_stores = config.max_stores,
            max_concurrent_provisions = config.max_concurrent_provisions,
            "orchestrator initialized"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                gate: ProvisionGate::new(config.max_concurrent_provisions),
                config,
                records,
                cluster,
                installer,
                monitor,
                admission: Mutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Provisioning pipelines currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.gate.in_flight()
    }

    /// Admit a new store, persist it as `Provisioning`, and start provisioning
    /// it in the background. Returns as soon as the record is written.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create_store(&self, store_type: StoreType) -> Result<StoreRecord, CoreError> {
        let inner = &self.inner;
        if !store_type.is_provisionable() {
            warn!(store_type = %store_type, "rejected unsupported store type");
            return Err(CoreError::UnsupportedType(store_type));
        }

        let (record, permit) = {
            let _admission = inner
                .admission
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let count = inner.records.count()?;
            if count >= inner.config.max_stores {
                warn!(count, max = inner.config.max_stores, "store limit reached");
                return Err(CoreError::CapacityReached {
                    max: inner.config.max_stores,
                });
            }
            let Some(permit) = inner.gate.try_acquire() else {
                warn!(
                    in_flight = inner.gate.in_flight(),
                    "concurrent provisioning limit reached"
                );
                return Err(CoreError::ConcurrencyLimit {
                    max: inner.gate.max(),
                });
            };

            let id = inner.unused_id()?;
            let record = inner
                .records
                .create(&StoreRecord::provisioning(id, store_type))?;
            (record, permit)
        };

        info!(
            store_id = %record.id,
            namespace = %record.namespace,
            step = "admitted",
            "store provisioning started"
        );
        tokio::spawn(Arc::clone(inner).run_provisioning(record.id.clone(), permit));
        Ok(record)
    }

    /// All stores, most recently created first.
    pub fn list_stores(&self) -> Result<Vec<StoreRecord>, CoreError> {
        Ok(self.inner.records.find_all()?)
    }

    pub fn get_store(&self, id: &str) -> Result<Option<StoreRecord>, CoreError> {
        Ok(self.inner.records.find_by_id(id)?)
    }

    pub fn store_status(&self, id: &str) -> Result<Option<StatusView>, CoreError> {
        Ok(self
            .inner
            .records
            .find_by_id(id)?
            .map(|r| r.status_view()))
    }

    /// Tear a store down and remove its record.
    ///
    /// A missing release or namespace is treated as already removed. Any other
    /// failure leaves the record `Failed` with a `Deletion failed: ...` message.
    pub async fn delete_store(&self, id: &str) -> Result<(), CoreError> {
        let inner = &self.inner;
        let record = {
            let _claim = inner
                .admission
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let record = inner
                .records
                .find_by_id(id)?
                .ok_or_else(|| CoreError::StoreNotFound(id.to_owned()))?;
            inner.transition(&record, &StatusUpdate::deleting())?;
            record
        };
        info!(
            store_id = %record.id,
            namespace = %record.namespace,
            step = "deleting",
            "store deletion started"
        );

        if let Err(e) = inner.teardown(&record).await {
            let message = format!("Deletion failed: {e}");
            error!(store_id = %record.id, namespace = %record.namespace, "{message}");
            inner.settle(&record.id, &StatusUpdate::failed(message));
            return Err(e.into());
        }

        inner.records.delete(id)?;
        info!(
            store_id = %record.id,
            namespace = %record.namespace,
            step = "deleted",
            "store deleted"
        );
        Ok(())
    }

    /// Probe the record store, cluster API and installer.
    pub async fn health(&self) -> HealthReport {
        let inner = &self.inner;
        let records = match inner.records.ping() {
            Ok(()) => true,
            Err(e) => {
                error!("record store health check failed: {e}");
                false
            }
        };
        let kubernetes = inner.cluster.check_connectivity().await;
        let helm = inner.installer.check_available().await;

        let checks = HealthChecks {
            records,
            kubernetes,
            helm,
        };
        let healthy = records && kubernetes && helm;
        HealthReport {
            status: if healthy { "healthy" } else { "unhealthy" },
            timestamp: Utc::now(),
            checks,
        }
    }

    /// Mark stores a previous process left `Provisioning` or `Deleting` as
    /// `Failed`. Call once at startup, before accepting requests.
    pub fn reconcile_stale(&self) -> Result<usize, CoreError> {
        let inner = &self.inner;
        let mut reconciled = 0;
        for record in inner.records.find_all()? {
            let message = match record.status {
                StoreStatus::Provisioning => "Provisioning interrupted by a restart",
                StoreStatus::Deleting => "Deletion interrupted by a restart",
                StoreStatus::Ready | StoreStatus::Failed => continue,
            };
            inner.transition(&record, &StatusUpdate::failed(message))?;
            warn!(store_id = %record.id, namespace = %record.namespace, "{message}");
            reconciled += 1;
        }
        if reconciled > 0 {
            info!(reconciled, "reconciled stale stores");
        }
        Ok(reconciled)
    }
}

impl Inner {
    fn unused_id(&self) -> Result<StoreId, CoreError> {
        let mut last = None;
        for _ in 0..ID_ATTEMPTS {
            let id = new_store_id(self.config.id_length);
            if self.records.find_by_id(&id)?.is_none() {
                return Ok(id);
            }
            warn!(store_id = %id, "generated store id already in use, drawing another");
            last = Some(id);
        }
        Err(StoreError::DuplicateId(last.map(StoreId::into_inner).unwrap_or_default()).into())
    }

    /// Validate and persist a status change of `record`.
    fn transition(
        &self,
        record: &StoreRecord,
        update: &StatusUpdate,
    ) -> Result<StoreRecord, CoreError> {
        validate_transition(record.status, update.status)?;
        Ok(self.records.update_status(&record.id, update)?)
    }

    /// Re-read the record, then apply `update`. Logs instead of failing.
    fn settle(&self, id: &StoreId, update: &StatusUpdate) {
        let result = self
            .records
            .find_by_id(id)
            .map_err(CoreError::from)
            .and_then(|r| r.ok_or_else(|| CoreError::StoreNotFound(id.to_string())))
            .and_then(|r| self.transition(&r, update));
        if let Err(e) = result {
            error!(store_id = %id, status = %update.status, "failed to record store status: {e}");
        }
    }

    async fn run_provisioning(self: Arc<Self>, id: StoreId, permit: ProvisionPermit) {
        let _permit = permit;
        let namespace = id.namespace();

        let pipeline = tokio::spawn({
            let inner = Arc::clone(&self);
            let id = id.clone();
            async move { inner.provision(&id).await }
        });
        let outcome = match pipeline.await {
            Ok(outcome) => outcome,
            Err(join) => {
                error!(store_id = %id, namespace = %namespace, "provisioning task aborted: {join}");
                Err(PipelineFailure::after_namespace(RuntimeError::Unavailable(
                    format!("provisioning task aborted: {join}"),
                )))
            }
        };

        match outcome {
            Ok(url) => {
                self.settle(&id, &StatusUpdate::ready(url.clone()));
                info!(
                    store_id = %id,
                    namespace = %namespace,
                    url = %url,
                    step = "ready",
                    "store provisioned"
                );
            }
            Err(failure) => {
                error!(
                    store_id = %id,
                    namespace = %namespace,
                    step = "failed",
                    "store provisioning failed: {}",
                    failure.error
                );
                if failure.rollback {
                    self.rollback(&id, &namespace).await;
                }
                self.settle(&id, &StatusUpdate::failed(failure.error.user_message()));
            }
        }
    }

    async fn provision(&self, id: &StoreId) -> Result<String, PipelineFailure> {
        let namespace = id.namespace();

        info!(store_id = %id, namespace = %namespace, step = "namespace", "creating namespace");
        match self.cluster.create_namespace(&namespace).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                debug!(store_id = %id, namespace = %namespace, "namespace already exists");
            }
            Err(e) => return Err(PipelineFailure::before_namespace(e)),
        }

        let host = format!("{id}{}", self.config.ingress_suffix());
        let values = ReleaseValues {
            store_id: id.to_string(),
            db_password: new_password(self.config.password_length),
            admin_password: new_password(self.config.password_length),
            ingress_host: host.clone(),
        };

        info!(
            store_id = %id,
            namespace = %namespace,
            step = "install",
            host = %host,
            "installing release"
        );
        self.installer
            .install(id, &namespace, &values)
            .await
            .map_err(PipelineFailure::after_namespace)?;

        info!(store_id = %id, namespace = %namespace, step = "readiness", "waiting for readiness");
        let timeout = self.config.readiness_timeout;
        if !self.monitor.wait_for_ready(&namespace, timeout).await {
            let report = diagnostics::collect(self.cluster.as_ref(), id, &namespace).await;
            diagnostics::log_report(&report);
            return Err(PipelineFailure::after_namespace(CoreError::ReadinessTimeout {
                timeout_secs: timeout.as_secs(),
            }));
        }

        Ok(host)
    }

    /// Best-effort removal of whatever the pipeline created.
    async fn rollback(&self, id: &StoreId, namespace: &str) {
        warn!(store_id = %id, namespace, step = "rollback", "rolling back");

        match self.installer.uninstall(id, namespace).await {
            Ok(()) => info!(store_id = %id, namespace, "rollback: release uninstalled"),
            Err(e) if e.is_not_found() => {
                debug!(store_id = %id, namespace, "rollback: no release to uninstall");
            }
            Err(e) => warn!(store_id = %id, namespace, "rollback: uninstall failed: {e}"),
        }

        match self.cluster.delete_namespace(namespace).await {
            Ok(()) => info!(store_id = %id, namespace, "rollback: namespace deleted"),
            Err(e) if e.is_not_found() => {
                debug!(store_id = %id, namespace, "rollback: namespace already gone");
            }
            Err(e) => warn!(store_id = %id, namespace, "rollback: namespace deletion failed: {e}"),
        }
    }

    async fn teardown(&self, record: &StoreRecord) -> Result<(), RuntimeError> {
        match self.installer.uninstall(&record.id, &record.namespace).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!(store_id = %record.id, "release not found, skipping uninstall");
            }
            Err(e) => return Err(e),
        }

        match self.cluster.delete_namespace(&record.namespace).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                info!(namespace = %record.namespace, "namespace not found, skipping deletion");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
