//! Provisioning orchestration for storeforge.
//!
//! This crate ties the record store and the cluster/installer capabilities
//! together into the `Orchestrator`: admission control over store count and
//! in-flight provisioning, the background provisioning pipeline with rollback,
//! synchronous deletion, the readiness monitor, failure diagnostics, and the
//! lifecycle state machine every status write is validated against.

pub mod concurrency;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod lifecycle;
pub mod monitor;
pub mod orchestrator;

pub use concurrency::{ProvisionGate, ProvisionPermit};
pub use config::{OrchestratorConfig, WorkloadNames};
pub use credentials::{new_password, new_store_id, DEFAULT_ID_LENGTH, DEFAULT_PASSWORD_LENGTH};
pub use diagnostics::{DiagnosticsReport, PodDiagnostics};
pub use lifecycle::validate_transition;
pub use monitor::ReadinessMonitor;
pub use orchestrator::{HealthChecks, HealthReport, Orchestrator};

use storeforge_store::{StoreStatus, StoreType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Maximum store limit reached ({max} stores)")]
    CapacityReached { max: usize },
    #[error("Maximum concurrent provisions reached ({max}). Please try again later.")]
    ConcurrencyLimit { max: usize },
    #[error("store type '{0}' is not supported yet")]
    UnsupportedType(StoreType),
    #[error("store not found: {0}")]
    StoreNotFound(String),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: StoreStatus, to: StoreStatus },
    #[error(
        "Store did not become ready within timeout ({}). Detailed diagnostics and pod logs have been written to the provisioning log.",
        format_timeout(*timeout_secs)
    )]
    ReadinessTimeout { timeout_secs: u64 },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(#[from] storeforge_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] storeforge_runtime::RuntimeError),
}

fn format_timeout(secs: u64) -> String {
    if secs % 60 == 0 {
        let minutes = secs / 60;
        if minutes == 1 {
            "1 minute".to_owned()
        } else {
            format!("{minutes} minutes")
        }
    } else {
        format!("{secs} seconds")
    }
}

impl CoreError {
    /// Rejected at admission: nothing was written and nothing was started.
    pub fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            CoreError::CapacityReached { .. }
                | CoreError::ConcurrencyLimit { .. }
                | CoreError::UnsupportedType(_)
        )
    }

    /// Text recorded as a store's `error_message`. Capability failures are
    /// reported without the `runtime error:` wrapper.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Runtime(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}
