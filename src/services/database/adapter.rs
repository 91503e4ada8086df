// Backend session traits. Real drivers and test fakes both plug in here.
use mongodb::bson::Document;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{Backend, ParamValue, ResultFrame};

/// Relational backend session - a pooled client safe for concurrent use.
#[async_trait::async_trait]
pub trait RelationalSession: Send + Sync {
    /// Run `sql`, which uses positional `$n` placeholders; `params[i]` binds
    /// `$i+1`. Column names come from the statement, so a query matching no
    /// rows still yields its columns.
    async fn query(&self, sql: &str, params: &[ParamValue]) -> Result<ResultFrame>;
}

/// Document backend session - a client safe for concurrent use.
#[async_trait::async_trait]
pub trait DocumentSession: Send + Sync {
    /// Run an aggregation pipeline and collect every returned document.
    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>>;

    /// Summary figures for a database.
    async fn overview(&self, database: &str) -> Result<DatabaseOverview>;
}

/// Store-level summary shown alongside document queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseOverview {
    pub database: String,
    pub collections: usize,
    pub estimated_documents: u64,
    pub storage_mb: f64,
    pub version: String,
}

/// Shared, immutable client for one (backend, uri) pair.
#[derive(Clone)]
pub enum ConnectionHandle {
    Relational(Arc<dyn RelationalSession>),
    Document(Arc<dyn DocumentSession>),
}

impl ConnectionHandle {
    pub fn backend(&self) -> Backend {
        match self {
            ConnectionHandle::Relational(_) => Backend::Relational,
            ConnectionHandle::Document(_) => Backend::Document,
        }
    }

    /// True when both handles refer to the same underlying client.
    pub fn same_as(&self, other: &ConnectionHandle) -> bool {
        match (self, other) {
            (ConnectionHandle::Relational(a), ConnectionHandle::Relational(b)) => Arc::ptr_eq(a, b),
            (ConnectionHandle::Document(a), ConnectionHandle::Document(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionHandle({})", self.backend().as_str())
    }
}

/// Builds connection handles. Injected into the connection cache so tests
/// can substitute fake backends.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, backend: Backend, uri: &str) -> Result<ConnectionHandle>;
}
