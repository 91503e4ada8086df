//! Error taxonomy for the query catalog engine.
//!
//! Every failure the engine can produce is one of these variants. None of
//! them carries a driver-specific error type, so callers can surface them to
//! users without knowing which backend ran the query.

use std::time::Duration;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Unknown query name, empty catalog, or a role with nothing visible.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// A query needs a parameter the caller did not supply.
    #[error("Missing parameter '{parameter}' for query '{query}'")]
    MissingParameter { parameter: String, query: String },

    /// Backend unreachable or authentication failed. Never cached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend rejected the query or pipeline, or the request timed out.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Catalog lookup and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("query '{0}' not found")]
    NotFound(String),

    #[error("no catalog loaded")]
    Empty,

    #[error("no entries for role '{0}'")]
    NoEntriesForRole(String),

    #[error("duplicate query name '{0}'")]
    DuplicateName(String),

    #[error("query '{query}' references undeclared parameter '{parameter}'")]
    UndeclaredPlaceholder { query: String, parameter: String },

    #[error("query '{query}' is invalid: {reason}")]
    Invalid { query: String, reason: String },

    #[error("failed to load catalog: {0}")]
    Load(String),
}

/// Execution failures. Holds the backend's message as text only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Backend(String),

    #[error("query timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
}

impl EngineError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::Backend(msg.into()))
    }

    pub fn timeout(after: Duration) -> Self {
        Self::Execution(ExecutionError::Timeout(after))
    }

    pub fn missing_parameter(parameter: impl Into<String>, query: impl Into<String>) -> Self {
        Self::MissingParameter {
            parameter: parameter.into(),
            query: query.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for the error class.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Catalog(CatalogError::NotFound(_)) => "QUERY_NOT_FOUND",
            Self::Catalog(CatalogError::NoEntriesForRole(_)) => "NO_ENTRIES_FOR_ROLE",
            Self::Catalog(_) => "CATALOG_ERROR",
            Self::MissingParameter { .. } => "MISSING_PARAMETER",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Execution(ExecutionError::Timeout(_)) => "EXECUTION_TIMEOUT",
            Self::Execution(_) => "EXECUTION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Connection failures are safe to retry; everything else needs the
    /// caller to change something first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Execution(ExecutionError::Timeout(_))
        )
    }
}

/// Result type alias using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;
