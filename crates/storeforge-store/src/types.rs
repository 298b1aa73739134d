//! Store record model: identifiers, platform types, lifecycle status, and the
//! projections handed to callers.
//!
//! All enums serialize to the exact strings persisted in the record store and
//! returned over the API (`"woocommerce"`, `"Provisioning"`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// Prefix joined with a store id to form its cluster namespace.
pub const NAMESPACE_PREFIX: &str = "store-";

/// Opaque short store identifier. Serializes as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// The namespace that isolates this store on the cluster.
    pub fn namespace(&self) -> String {
        format!("{NAMESPACE_PREFIX}{}", self.0)
    }
}

impl Deref for StoreId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StoreId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for StoreId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StoreId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<String> for StoreId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StoreId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Supported store platforms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Woocommerce,
    Medusa,
}

impl StoreType {
    pub const ALL: [StoreType; 2] = [StoreType::Woocommerce, StoreType::Medusa];

    /// Whether a chart exists for this platform. Only WooCommerce ships today.
    pub fn is_provisionable(self) -> bool {
        matches!(self, StoreType::Woocommerce)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoreType::Woocommerce => "woocommerce",
            StoreType::Medusa => "medusa",
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStoreType(pub String);

impl fmt::Display for UnknownStoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown store type '{}' (expected \"woocommerce\" or \"medusa\")",
            self.0
        )
    }
}

impl std::error::Error for UnknownStoreType {}

impl FromStr for StoreType {
    type Err = UnknownStoreType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "woocommerce" => Ok(StoreType::Woocommerce),
            "medusa" => Ok(StoreType::Medusa),
            other => Err(UnknownStoreType(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StoreStatus {
    Provisioning,
    Ready,
    Failed,
    Deleting,
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreStatus::Provisioning => write!(f, "Provisioning"),
            StoreStatus::Ready => write!(f, "Ready"),
            StoreStatus::Failed => write!(f, "Failed"),
            StoreStatus::Deleting => write!(f, "Deleting"),
        }
    }
}

/// The persisted record of one store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreRecord {
    pub id: StoreId,
    #[serde(rename = "type")]
    pub store_type: StoreType,
    pub namespace: String,
    pub status: StoreStatus,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoreRecord {
    /// A fresh `Provisioning` record; the namespace is derived from the id.
    pub fn provisioning(id: StoreId, store_type: StoreType) -> Self {
        let now = Utc::now();
        Self {
            namespace: id.namespace(),
            id,
            store_type,
            status: StoreStatus::Provisioning,
            url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status_view(&self) -> StatusView {
        StatusView {
            id: self.id.clone(),
            status: self.status,
            url: self.url.clone(),
            error_message: self.error_message.clone(),
        }
    }

    /// Apply a status update in place, bumping `updated_at`.
    pub fn apply(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        self.error_message.clone_from(&update.error_message);
        if let Some(url) = &update.url {
            self.url.clone_from(url);
        }
        self.updated_at = Utc::now();
    }
}

/// Minimal projection for frequent status polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusView {
    pub id: StoreId,
    pub status: StoreStatus,
    pub url: Option<String>,
    pub error_message: Option<String>,
}

/// A status transition to persist.
///
/// `error_message` always overwrites. `url` is `None` to leave the stored url
/// untouched, `Some(None)` to clear it, and `Some(Some(_))` to set it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: StoreStatus,
    pub error_message: Option<String>,
    pub url: Option<Option<String>>,
}

impl StatusUpdate {
    pub fn deleting() -> Self {
        Self {
            status: StoreStatus::Deleting,
            error_message: None,
            url: None,
        }
    }

    pub fn ready(url: impl Into<String>) -> Self {
        Self {
            status: StoreStatus::Ready,
            error_message: None,
            url: Some(Some(url.into())),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StoreStatus::Failed,
            error_message: Some(message.into()),
            url: None,
        }
    }
}
