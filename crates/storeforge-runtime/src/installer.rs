use crate::RuntimeError;
use async_trait::async_trait;
use std::fmt;

/// Values handed to the store chart for one release.
#[derive(Clone, PartialEq, Eq)]
pub struct ReleaseValues {
    pub store_id: String,
    pub db_password: String,
    pub admin_password: String,
    pub ingress_host: String,
}

impl ReleaseValues {
    /// Chart value paths paired with their values, in chart order.
    pub fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("storeId", self.store_id.as_str()),
            ("wordpress.adminPassword", self.admin_password.as_str()),
            ("mysql.auth.rootPassword", self.db_password.as_str()),
            ("mysql.auth.password", self.db_password.as_str()),
            ("ingress.hosts[0].host", self.ingress_host.as_str()),
        ]
    }
}

// Passwords must never reach logs.
impl fmt::Debug for ReleaseValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseValues")
            .field("store_id", &self.store_id)
            .field("db_password", &"<redacted>")
            .field("admin_password", &"<redacted>")
            .field("ingress_host", &self.ingress_host)
            .finish()
    }
}

/// Installs and removes packaged store releases.
///
/// `uninstall` of an unknown release reports `RuntimeError::NotFound`.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    fn name(&self) -> &str;

    /// Install `release` into `namespace`, returning once the installer
    /// reports completion or its own deadline elapses.
    async fn install(
        &self,
        release: &str,
        namespace: &str,
        values: &ReleaseValues,
    ) -> Result<(), RuntimeError>;

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<(), RuntimeError>;

    /// Release status string (e.g. `deployed`), or `None` if there is no such release.
    async fn status(&self, release: &str, namespace: &str) -> Result<Option<String>, RuntimeError>;

    async fn check_available(&self) -> bool;
}
