use std::fmt;
use std::path::PathBuf;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn default_kubeconfig() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".kube").join("config"))
}

fn cluster_config_present() -> bool {
    if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
        return true;
    }
    if let Some(paths) = std::env::var_os("KUBECONFIG") {
        if std::env::split_paths(&paths).any(|p| p.is_file()) {
            return true;
        }
    }
    default_kubeconfig().is_some_and(|p| p.is_file())
}

/// Check that the Helm CLI is callable.
pub fn check_helm_prereqs(binary: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    if !command_exists(binary) {
        missing.push(MissingPrereq {
            name: "helm",
            purpose: "installing store charts",
            install_hint: "https://helm.sh/docs/intro/install/ | brew install helm | snap install helm --classic",
        });
    }
    missing
}

/// Check that cluster credentials can be found: in-cluster service
/// environment, `KUBECONFIG`, or `~/.kube/config`.
pub fn check_cluster_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    if !cluster_config_present() {
        missing.push(MissingPrereq {
            name: "kubeconfig",
            purpose: "access to the Kubernetes cluster",
            install_hint: "set KUBECONFIG or create ~/.kube/config (e.g. kind create cluster)",
        });
    }
    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nstoreforge needs these to provision stores; ");
    msg.push_str("use --mock-backends to run without a cluster.");
    msg
}
