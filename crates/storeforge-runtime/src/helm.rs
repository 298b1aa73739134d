use crate::installer::{PackageInstaller, ReleaseValues};
use crate::{Environment, RuntimeError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    /// Helm executable, looked up on `PATH` unless absolute.
    pub binary: String,
    /// Directory of the store chart.
    pub chart_path: PathBuf,
    pub environment: Environment,
    /// Helm's own `--timeout` for `install --wait`.
    #[serde(with = "duration_secs")]
    pub install_wait: Duration,
    /// Hard deadline for the whole `helm install` process.
    #[serde(with = "duration_secs")]
    pub install_deadline: Duration,
    #[serde(with = "duration_secs")]
    pub uninstall_wait: Duration,
    #[serde(with = "duration_secs")]
    pub uninstall_deadline: Duration,
    #[serde(with = "duration_secs")]
    pub query_deadline: Duration,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            binary: "helm".to_owned(),
            chart_path: PathBuf::from("./helm/store"),
            environment: Environment::Local,
            install_wait: Duration::from_secs(5 * 60),
            install_deadline: Duration::from_secs(6 * 60),
            uninstall_wait: Duration::from_secs(3 * 60),
            uninstall_deadline: Duration::from_secs(4 * 60),
            query_deadline: Duration::from_secs(60),
        }
    }
}

impl HelmConfig {
    pub fn values_file(&self) -> PathBuf {
        let file = match self.environment {
            Environment::Production => "values-prod.yaml",
            Environment::Local => "values-local.yaml",
        };
        self.chart_path.join(file)
    }
}

/// Serde adapter storing a `Duration` as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

fn helm_duration(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_EXCERPT {
        return trimmed.to_owned();
    }
    let mut end = STDERR_EXCERPT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

/// Helm reports a missing release as
/// `Error: uninstall: Release not loaded: <name>: release: not found`.
fn is_release_not_found(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("release: not found") || lower.contains("release not loaded")
}

/// `PackageInstaller` driving the `helm` CLI.
pub struct HelmInstaller {
    config: HelmConfig,
}

impl HelmInstaller {
    pub fn new(config: HelmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HelmConfig {
        &self.config
    }

    /// Arguments for `helm install`.
    pub fn install_args(
        &self,
        release: &str,
        namespace: &str,
        values: &ReleaseValues,
    ) -> Vec<String> {
        let mut args = vec![
            "install".to_owned(),
            release.to_owned(),
            self.config.chart_path.to_string_lossy().into_owned(),
            "--namespace".to_owned(),
            namespace.to_owned(),
            "--create-namespace".to_owned(),
            "--values".to_owned(),
            self.config.values_file().to_string_lossy().into_owned(),
        ];
        for (key, value) in values.entries() {
            args.push("--set-string".to_owned());
            args.push(format!("{key}={value}"));
        }
        args.extend([
            "--wait".to_owned(),
            "--timeout".to_owned(),
            helm_duration(self.config.install_wait),
        ]);
        args
    }

    pub fn uninstall_args(&self, release: &str, namespace: &str) -> Vec<String> {
        vec![
            "uninstall".to_owned(),
            release.to_owned(),
            "--namespace".to_owned(),
            namespace.to_owned(),
            "--wait".to_owned(),
            "--timeout".to_owned(),
            helm_duration(self.config.uninstall_wait),
        ]
    }

    async fn run(
        &self,
        operation: &str,
        args: &[String],
        deadline: Duration,
    ) -> Result<Output, RuntimeError> {
        debug!("executing {} {}", self.config.binary, args.first().map_or("", String::as_str));
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args).kill_on_drop(true);

        match tokio::time::timeout(deadline, cmd.output()).await {
            Err(_) => Err(RuntimeError::Timeout {
                operation: operation.to_owned(),
                secs: deadline.as_secs(),
            }),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(
                RuntimeError::Unavailable(format!("'{}' not found on PATH", self.config.binary)),
            ),
            Ok(Err(e)) => Err(RuntimeError::Io(e)),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

#[async_trait]
impl PackageInstaller for HelmInstaller {
    fn name(&self) -> &'static str {
        "helm"
    }

    async fn install(
        &self,
        release: &str,
        namespace: &str,
        values: &ReleaseValues,
    ) -> Result<(), RuntimeError> {
        info!(
            release,
            namespace,
            chart = %self.config.chart_path.display(),
            values_file = %self.config.values_file().display(),
            "installing chart"
        );
        let args = self.install_args(release, namespace, values);
        let output = self
            .run("helm install", &args, self.config.install_deadline)
            .await?;
        if !output.status.success() {
            let detail = excerpt(&output.stderr);
            error!(release, namespace, "helm install failed: {detail}");
            return Err(RuntimeError::CommandFailed {
                operation: "helm install".to_owned(),
                detail,
            });
        }
        info!(release, namespace, "chart installed");
        Ok(())
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<(), RuntimeError> {
        info!(release, namespace, "uninstalling chart");
        let args = self.uninstall_args(release, namespace);
        let output = self
            .run("helm uninstall", &args, self.config.uninstall_deadline)
            .await?;
        if !output.status.success() {
            let detail = excerpt(&output.stderr);
            if is_release_not_found(&detail) {
                return Err(RuntimeError::NotFound {
                    kind: "release",
                    name: release.to_owned(),
                });
            }
            error!(release, namespace, "helm uninstall failed: {detail}");
            return Err(RuntimeError::CommandFailed {
                operation: "helm uninstall".to_owned(),
                detail,
            });
        }
        info!(release, namespace, "chart uninstalled");
        Ok(())
    }

    async fn status(&self, release: &str, namespace: &str) -> Result<Option<String>, RuntimeError> {
        let args: Vec<String> = ["status", release, "--namespace", namespace, "--output", "json"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        let output = self
            .run("helm status", &args, self.config.query_deadline)
            .await?;
        if !output.status.success() {
            let detail = excerpt(&output.stderr);
            if is_release_not_found(&detail) {
                return Ok(None);
            }
            return Err(RuntimeError::CommandFailed {
                operation: "helm status".to_owned(),
                detail,
            });
        }
        let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(value
            .pointer("/info/status")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned))
    }

    async fn check_available(&self) -> bool {
        let args = ["version".to_owned(), "--short".to_owned()];
        match self
            .run("helm version", &args, self.config.query_deadline)
            .await
        {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                error!("helm version failed: {}", excerpt(&output.stderr));
                false
            }
            Err(e) => {
                error!("helm is not installed or not in PATH: {e}");
                false
            }
        }
    }
}
