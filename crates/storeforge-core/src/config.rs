use crate::credentials::{DEFAULT_ID_LENGTH, DEFAULT_PASSWORD_LENGTH};
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use storeforge_runtime::helm::duration_secs;
use storeforge_runtime::{Environment, HelmConfig};

/// Names of the chart's workloads the readiness monitor watches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkloadNames {
    pub deployment: String,
    pub stateful_set: String,
    pub ingress: String,
}

impl Default for WorkloadNames {
    fn default() -> Self {
        Self {
            deployment: "wordpress".to_owned(),
            stateful_set: "mysql".to_owned(),
            ingress: "wordpress-ingress".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_stores: usize,
    pub max_concurrent_provisions: usize,
    pub environment: Environment,
    pub prod_ingress_suffix: String,
    pub local_ingress_suffix: String,
    #[serde(with = "duration_secs")]
    pub readiness_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// Probe the store URL over HTTP as a final readiness check.
    pub http_probe: bool,
    #[serde(with = "duration_secs")]
    pub http_probe_timeout: Duration,
    pub id_length: usize,
    pub password_length: usize,
    /// Mark stores left `Provisioning`/`Deleting` by a previous process as failed on start.
    pub reconcile_on_start: bool,
    pub workloads: WorkloadNames,
    pub helm: HelmConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_stores: 50,
            max_concurrent_provisions: 3,
            environment: Environment::Local,
            prod_ingress_suffix: ".yourdomain.com".to_owned(),
            local_ingress_suffix: ".localhost".to_owned(),
            readiness_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
            http_probe: false,
            http_probe_timeout: Duration::from_secs(5),
            id_length: DEFAULT_ID_LENGTH,
            password_length: DEFAULT_PASSWORD_LENGTH,
            reconcile_on_start: false,
            workloads: WorkloadNames::default(),
            helm: HelmConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, CoreError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CoreError::Config(format!("invalid {name} '{value}': {e}")))
}

impl OrchestratorConfig {
    /// Defaults, then the TOML file at `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| CoreError::Config(format!("invalid config: {e}")))?;
        config.helm.environment = config.environment;
        Ok(config)
    }

    /// Apply `MAX_STORES`, `MAX_CONCURRENT_PROVISIONS`, `ENVIRONMENT`,
    /// `PROD_INGRESS_SUFFIX`, `LOCAL_INGRESS_SUFFIX` and `HELM_CHART_PATH`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), CoreError> {
        if let Some(v) = lookup("MAX_STORES") {
            self.max_stores = parse_env("MAX_STORES", &v)?;
        }
        if let Some(v) = lookup("MAX_CONCURRENT_PROVISIONS") {
            self.max_concurrent_provisions = parse_env("MAX_CONCURRENT_PROVISIONS", &v)?;
        }
        if let Some(v) = lookup("ENVIRONMENT") {
            self.environment = Environment::from_env_value(&v);
        }
        if let Some(v) = lookup("PROD_INGRESS_SUFFIX") {
            self.prod_ingress_suffix = v;
        }
        if let Some(v) = lookup("LOCAL_INGRESS_SUFFIX") {
            self.local_ingress_suffix = v;
        }
        if let Some(v) = lookup("HELM_CHART_PATH") {
            self.helm.chart_path = PathBuf::from(v);
        }
        self.helm.environment = self.environment;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrent_provisions == 0 {
            return Err(CoreError::Config(
                "max_concurrent_provisions must be at least 1".to_owned(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(CoreError::Config(
                "poll_interval must be at least 1 second".to_owned(),
            ));
        }
        if !(4..=64).contains(&self.id_length) {
            return Err(CoreError::Config(format!(
                "id_length must be between 4 and 64, got {}",
                self.id_length
            )));
        }
        if self.password_length < 8 {
            return Err(CoreError::Config(format!(
                "password_length must be at least 8, got {}",
                self.password_length
            )));
        }
        Ok(())
    }

    pub fn ingress_suffix(&self) -> &str {
        match self.environment {
            Environment::Production => &self.prod_ingress_suffix,
            Environment::Local => &self.local_ingress_suffix,
        }
    }
}
