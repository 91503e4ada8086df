// Backend drivers behind a common session abstraction
pub mod adapter;
pub mod mongo;
pub mod postgresql;

pub use adapter::{ConnectionHandle, Connector, DatabaseOverview, DocumentSession, RelationalSession};
pub use mongo::MongoSession;
pub use postgresql::PostgreSQLSession;

use crate::error::Result;
use crate::models::Backend;
use std::sync::Arc;

/// Connector backed by the real PostgreSQL and MongoDB drivers.
pub struct DriverConnector {
    max_pool_size: usize,
}

impl DriverConnector {
    pub fn new(max_pool_size: usize) -> Self {
        Self { max_pool_size }
    }
}

impl Default for DriverConnector {
    fn default() -> Self {
        Self::new((num_cpus::get() * 2).max(4))
    }
}

#[async_trait::async_trait]
impl Connector for DriverConnector {
    async fn connect(&self, backend: Backend, uri: &str) -> Result<ConnectionHandle> {
        match backend {
            Backend::Relational => {
                let session = PostgreSQLSession::connect(uri, self.max_pool_size).await?;
                Ok(ConnectionHandle::Relational(Arc::new(session)))
            }
            Backend::Document => {
                let session = MongoSession::connect(uri).await?;
                Ok(ConnectionHandle::Document(Arc::new(session)))
            }
        }
    }
}

/// Mask credentials in connection URL for safe logging
pub fn mask_credentials(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let mut masked = parsed.clone();
            if parsed.password().is_some() {
                let _ = masked.set_password(Some("***"));
            }
            masked.to_string()
        }
        Err(_) => "[invalid-url]".to_string(),
    }
}

/// Strip a driver suffix from a PostgreSQL scheme: `postgresql+psycopg2://`
/// becomes `postgresql://`. Other schemes (e.g. `mongodb+srv`) are kept.
pub fn normalize_uri(uri: &str) -> String {
    let uri = uri.trim();
    if let Some((scheme, rest)) = uri.split_once("://") {
        if let Some((base, _driver)) = scheme.split_once('+') {
            if base == "postgresql" || base == "postgres" {
                return format!("{}://{}", base, rest);
            }
        }
    }
    uri.to_string()
}
