use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The storage backends a repository can hold DAOs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Persistent LSM keyspace, one partition per physical table.
    Fjall,
    /// Process-local tables, lost on exit.
    Memory,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fjall => f.write_str("fjall"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fjall" => Ok(Self::Fjall),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage kind {other:?}")),
        }
    }
}

/// The backend chosen for one request, with backend-specific settings passed
/// through to the DAO untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storage {
    pub kind: StorageKind,
    pub config: HashMap<String, String>,
}

impl Storage {
    pub fn new(kind: StorageKind) -> Self {
        Self {
            kind,
            config: HashMap::new(),
        }
    }
}

/// Routes a workspace and tenant set to a storage backend.
pub trait StorageProvider: Send + Sync {
    fn trace_storage(&self, workspace_id: i64, tenants: &[String]) -> Storage;

    /// Every backend `trace_storage` may return. Checked against the DAO
    /// registry when a repository is built.
    fn kinds(&self) -> Vec<StorageKind>;
}

/// Sends every request to the same backend.
#[derive(Debug, Clone)]
pub struct FixedStorageProvider(pub Storage);

impl FixedStorageProvider {
    pub fn new(kind: StorageKind) -> Self {
        Self(Storage::new(kind))
    }
}

impl StorageProvider for FixedStorageProvider {
    fn trace_storage(&self, _workspace_id: i64, _tenants: &[String]) -> Storage {
        self.0.clone()
    }

    fn kinds(&self) -> Vec<StorageKind> {
        vec![self.0.kind]
    }
}
