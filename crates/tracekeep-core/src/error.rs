use thiserror::Error;

use crate::ttl::Ttl;

/// A request stopped before its storage call finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("request cancelled")]
    Cancelled,
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open storage: {0}")]
    Open(String),
    #[error("failed to write: {0}")]
    Write(String),
    #[error("failed to read: {0}")]
    Read(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read tenant config: {0}")]
    Read(String),
    #[error("failed to parse tenant config: {0}")]
    Parse(String),
}

/// Which physical table a write was being routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Span,
    Annotation,
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Span => f.write_str("span"),
            Self::Annotation => f.write_str("annotation"),
        }
    }
}

/// Errors surfaced by the trace repository.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The caller sent an invalid or incomplete request.
    #[error("invalid param: {0}")]
    InvalidParam(String),
    /// The tenant/table topology lacks an entry the request needs.
    #[error("no {kind} table config found for tenant {tenant} with ttl {ttl}")]
    Configuration {
        tenant: String,
        ttl: Ttl,
        kind: TableKind,
    },
    /// The storage layer failed while executing `op`.
    #[error("{op} failed: {source}")]
    Upstream {
        op: &'static str,
        #[source]
        source: StorageError,
    },
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl RepoError {
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    /// Wraps a storage failure, keeping cancellation distinguishable from
    /// store outages.
    pub fn upstream(op: &'static str, source: StorageError) -> Self {
        match source {
            StorageError::Interrupted(reason) => Self::Interrupted(reason),
            source => Self::Upstream { op, source },
        }
    }
}

impl From<ConfigError> for RepoError {
    fn from(err: ConfigError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_keeps_interruption_kind() {
        let err = RepoError::upstream("list spans", StorageError::Interrupted(Interrupted::Cancelled));
        assert!(matches!(err, RepoError::Interrupted(Interrupted::Cancelled)));

        let err = RepoError::upstream("list spans", StorageError::Read("io".into()));
        assert!(matches!(err, RepoError::Upstream { op: "list spans", .. }));
        assert_eq!(err.to_string(), "list spans failed: failed to read: io");
    }

    #[test]
    fn test_configuration_message_names_tenant_and_ttl() {
        let err = RepoError::Configuration {
            tenant: "acme".into(),
            ttl: Ttl::SevenDays,
            kind: TableKind::Annotation,
        };
        assert_eq!(
            err.to_string(),
            "no annotation table config found for tenant acme with ttl 7d"
        );
    }
}
