// Backend dispatch: run a bound catalog entry on a borrowed connection
use chrono::Utc;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::models::{BoundParams, ParamValue, QueryBody, QueryDefinition, ResultFrame};
use crate::services::database::mongo::{bind_pipeline, flatten_documents};
use crate::services::database::ConnectionHandle;
use crate::services::query_cache::QueryResultCache;
use crate::validation::PlaceholderScanner;

/// Marker replaced by the configured schema in relational query text.
pub const SCHEMA_MARKER: &str = "{S}.";

/// Runs one query on a connection it borrows but never closes.
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        definition: &QueryDefinition,
        params: &BoundParams,
        handle: &ConnectionHandle,
    ) -> Result<ResultFrame>;
}

/// Executes relational entries with driver-side parameter binding.
pub struct RelationalExecutor {
    schema: String,
}

impl RelationalExecutor {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    /// Replace `{S}.` with `<schema>.`, or drop it when no schema is set.
    pub fn qualify(&self, sql: &str) -> String {
        if self.schema.is_empty() {
            sql.replace(SCHEMA_MARKER, "")
        } else {
            sql.replace(SCHEMA_MARKER, &format!("{}.", self.schema))
        }
    }
}

#[async_trait::async_trait]
impl QueryExecutor for RelationalExecutor {
    async fn execute(
        &self,
        definition: &QueryDefinition,
        params: &BoundParams,
        handle: &ConnectionHandle,
    ) -> Result<ResultFrame> {
        let sql = match definition.body() {
            QueryBody::Relational { sql } => sql,
            QueryBody::Document { .. } => {
                return Err(EngineError::internal(format!(
                    "'{}' is not a relational query",
                    definition.name()
                )))
            }
        };
        let ConnectionHandle::Relational(session) = handle else {
            return Err(EngineError::internal(format!(
                "'{}' needs a relational connection, got {:?}",
                definition.name(),
                handle
            )));
        };

        let positional = PlaceholderScanner::to_positional(&self.qualify(sql)).map_err(|e| {
            EngineError::internal(format!("'{}' has malformed SQL text: {}", definition.name(), e))
        })?;
        let values: Vec<ParamValue> = positional
            .names
            .iter()
            .map(|name| {
                params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EngineError::missing_parameter(name, definition.name()))
            })
            .collect::<Result<_>>()?;

        tracing::debug!(
            "Executing relational query '{}' with {} bound parameter(s)",
            definition.name(),
            values.len()
        );
        session.query(&positional.sql, &values).await
    }
}

/// Executes document entries as aggregation pipelines, optionally caching
/// flattened results for a short TTL.
pub struct DocumentExecutor {
    database: String,
    cache: Option<Arc<QueryResultCache>>,
}

impl DocumentExecutor {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<QueryResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

#[async_trait::async_trait]
impl QueryExecutor for DocumentExecutor {
    async fn execute(
        &self,
        definition: &QueryDefinition,
        params: &BoundParams,
        handle: &ConnectionHandle,
    ) -> Result<ResultFrame> {
        let (collection, pipeline) = match definition.body() {
            QueryBody::Document {
                collection,
                pipeline,
            } => (collection, pipeline),
            QueryBody::Relational { .. } => {
                return Err(EngineError::internal(format!(
                    "'{}' is not a document query",
                    definition.name()
                )))
            }
        };
        let ConnectionHandle::Document(session) = handle else {
            return Err(EngineError::internal(format!(
                "'{}' needs a document connection, got {:?}",
                definition.name(),
                handle
            )));
        };

        let cache_key = self
            .cache
            .as_ref()
            .map(|_| QueryResultCache::key(&self.database, collection, pipeline, params));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(frame) = cache.get(key) {
                return Ok(frame);
            }
        }

        let stages = bind_pipeline(definition.name(), pipeline, params, Utc::now())?;
        tracing::debug!(
            "Running {}-stage pipeline '{}' on {}.{}",
            stages.len(),
            definition.name(),
            self.database,
            collection
        );
        let docs = session.aggregate(&self.database, collection, stages).await?;
        let frame = flatten_documents(&docs);

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.put(key, frame.clone());
        }
        Ok(frame)
    }
}
