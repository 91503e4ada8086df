use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{CatalogError, EngineError, Result};
use crate::models::{
    Backend, BoundParams, Catalog, ParameterContext, QueryDefinition, QueryDescription, QueryRun, ResultFrame,
};
use crate::services::chart_renderer::ChartRenderer;
use crate::services::connection_cache::ConnectionCache;
use crate::services::database::{ConnectionHandle, DatabaseOverview};
use crate::services::executor::{DocumentExecutor, QueryExecutor, RelationalExecutor};
use crate::services::parameter_binder;
use crate::services::query_cache::QueryResultCache;
use crate::services::role_filter;

/// Backend targets and limits for a `QueryEngine`.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub relational_uri: Option<String>,
    pub relational_schema: String,
    pub document_uri: Option<String>,
    pub document_database: String,
    pub query_timeout: Duration,
    /// Zero disables the aggregation cache.
    pub aggregation_cache_ttl: Duration,
    pub aggregation_cache_max_entries: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            relational_uri: None,
            relational_schema: "public".to_string(),
            document_uri: None,
            document_database: "eldercare".to_string(),
            query_timeout: Duration::from_secs(30),
            aggregation_cache_ttl: Duration::from_secs(60),
            aggregation_cache_max_entries: 256,
        }
    }
}

/// Caller-facing operations over a loaded catalog.
pub struct QueryEngine {
    catalog: Catalog,
    connections: Arc<ConnectionCache>,
    relational: RelationalExecutor,
    document: DocumentExecutor,
    aggregation_cache: Option<Arc<QueryResultCache>>,
    options: EngineOptions,
}

impl QueryEngine {
    pub fn new(catalog: Catalog, connections: Arc<ConnectionCache>, options: EngineOptions) -> Self {
        let aggregation_cache = (!options.aggregation_cache_ttl.is_zero()).then(|| {
            Arc::new(QueryResultCache::new(
                options.aggregation_cache_max_entries,
                options.aggregation_cache_ttl,
            ))
        });

        let mut document = DocumentExecutor::new(options.document_database.clone());
        if let Some(cache) = &aggregation_cache {
            document = document.with_cache(Arc::clone(cache));
        }

        Self {
            catalog,
            connections,
            relational: RelationalExecutor::new(options.relational_schema.clone()),
            document,
            aggregation_cache,
            options,
        }
    }

    pub fn aggregation_cache(&self) -> Option<&QueryResultCache> {
        self.aggregation_cache.as_deref()
    }

    /// Entries `role` may run, in catalog order.
    pub fn list_visible(&self, role: &str) -> Result<Vec<&QueryDefinition>> {
        Ok(role_filter::visible(&self.catalog, role)?)
    }

    pub fn describe(&self, name: &str) -> Result<QueryDescription> {
        Ok(QueryDescription::from(self.catalog.get(name)?))
    }

    /// Run `name` on behalf of `role`. An entry the role cannot see is
    /// reported as not found.
    pub async fn run_as(&self, role: &str, name: &str, context: &ParameterContext) -> Result<QueryRun> {
        let definition = self.catalog.get(name)?;
        if !definition.is_visible_to(role) {
            tracing::warn!("Role '{}' requested hidden query '{}'", role, name);
            return Err(CatalogError::NotFound(name.to_string()).into());
        }
        self.run_definition(definition, context).await
    }

    /// Bind, execute and render one catalog entry.
    pub async fn run(&self, name: &str, context: &ParameterContext) -> Result<QueryRun> {
        let definition = self.catalog.get(name)?;
        self.run_definition(definition, context).await
    }

    async fn run_definition(&self, definition: &QueryDefinition, context: &ParameterContext) -> Result<QueryRun> {
        // Fails before any backend is touched.
        let params = parameter_binder::bind(definition, context)?;

        let start_time = Instant::now();
        let frame = self
            .execute_bound(definition, &params)
            .await
            .inspect_err(|e| tracing::error!("Query '{}' failed: {}", definition.name(), e))?;

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        tracing::info!(
            "Query '{}' returned {} row(s) in {}ms",
            definition.name(),
            frame.row_count(),
            execution_time_ms
        );

        let row_count = frame.row_count();
        let plan = ChartRenderer::render(frame, definition.chart());
        Ok(QueryRun::new(definition, row_count, execution_time_ms, plan))
    }

    // Connect and execute under the request timeout.
    async fn execute_bound(&self, definition: &QueryDefinition, params: &BoundParams) -> Result<ResultFrame> {
        let backend = definition.backend();
        tokio::time::timeout(self.options.query_timeout, async {
            let handle = self.connect(backend).await?;
            self.executor_for(backend).execute(definition, params, &handle).await
        })
        .await
        .map_err(|_| {
            tracing::warn!(
                "Query '{}' exceeded {:?}",
                definition.name(),
                self.options.query_timeout
            );
            EngineError::timeout(self.options.query_timeout)
        })?
    }

    /// Summary of the configured document database.
    pub async fn document_overview(&self) -> Result<DatabaseOverview> {
        let database = &self.options.document_database;
        tokio::time::timeout(self.options.query_timeout, async {
            match self.connect(Backend::Document).await? {
                ConnectionHandle::Document(session) => session.overview(database).await,
                other => Err(EngineError::internal(format!(
                    "expected a document connection, got {:?}",
                    other
                ))),
            }
        })
        .await
        .map_err(|_| EngineError::timeout(self.options.query_timeout))?
    }

    fn executor_for(&self, backend: Backend) -> &dyn QueryExecutor {
        match backend {
            Backend::Relational => &self.relational,
            Backend::Document => &self.document,
        }
    }

    async fn connect(&self, backend: Backend) -> Result<ConnectionHandle> {
        let uri = match backend {
            Backend::Relational => self.options.relational_uri.as_deref(),
            Backend::Document => self.options.document_uri.as_deref(),
        }
        .filter(|uri| !uri.trim().is_empty())
        .ok_or_else(|| EngineError::config(format!("no {} backend URI configured", backend.as_str())))?;

        self.connections.get(backend, uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use crate::models::{ChartSpec, ParamValue, RenderPlan, XyChart, YColumns};
    use crate::services::database::{Connector, DocumentSession, RelationalSession};
    use mongodb::bson::{doc, Document};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeRelational {
        frame: ResultFrame,
        delay: Duration,
        seen: Mutex<Vec<Vec<ParamValue>>>,
    }

    #[async_trait::async_trait]
    impl RelationalSession for FakeRelational {
        async fn query(&self, _sql: &str, params: &[ParamValue]) -> Result<ResultFrame> {
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push(params.to_vec());
            Ok(self.frame.clone())
        }
    }

    struct FakeDocuments;

    #[async_trait::async_trait]
    impl DocumentSession for FakeDocuments {
        async fn aggregate(
            &self,
            _database: &str,
            _collection: &str,
            _pipeline: Vec<Document>,
        ) -> Result<Vec<Document>> {
            Ok(vec![
                doc! {"_id": {"level": "LOW"}, "count": 3},
                doc! {"_id": {"level": "OK"}, "count": 9},
            ])
        }

        async fn overview(&self, database: &str) -> Result<DatabaseOverview> {
            Ok(DatabaseOverview {
                database: database.to_string(),
                collections: 4,
                estimated_documents: 1200,
                storage_mb: 2.5,
                version: "7.0.0".to_string(),
            })
        }
    }

    struct FakeConnector {
        relational: Arc<FakeRelational>,
        connects: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, backend: Backend, _uri: &str) -> Result<ConnectionHandle> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(match backend {
                Backend::Relational => ConnectionHandle::Relational(self.relational.clone()),
                Backend::Document => ConnectionHandle::Document(Arc::new(FakeDocuments)),
            })
        }
    }

    fn patients_frame() -> ResultFrame {
        let mut frame = ResultFrame::new(vec!["patient".to_string(), "age".to_string()]);
        frame.push_row(vec![json!("Ana"), json!(91)]).unwrap();
        frame.push_row(vec![json!("Ben"), json!(86)]).unwrap();
        frame
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            QueryDefinition::relational(
                "Doctor: high-risk",
                "SELECT name AS patient, age FROM {S}.patients WHERE doctor_id = :doctor_id AND age > :age_threshold",
            )
            .with_params(["doctor_id", "age_threshold"])
            .with_roles(["doctor"])
            .with_chart(ChartSpec::Bar(XyChart {
                x: "patient".to_string(),
                y: YColumns::One("age".to_string()),
                color: None,
                size: None,
                secondary_y: None,
            })),
            QueryDefinition::relational("Mgr: staff", "SELECT * FROM {S}.staff").with_roles(["manager"]),
            QueryDefinition::document(
                "Battery levels",
                "devices",
                vec![json!({"$group": {"_id": {"level": "$battery_level"}, "count": {"$sum": 1}}})],
            )
            .with_chart(ChartSpec::Pie {
                names: "_id.level".to_string(),
                values: "count".to_string(),
            }),
        ])
        .unwrap()
    }

    fn engine_with(frame: ResultFrame, delay: Duration, options: EngineOptions) -> (QueryEngine, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector {
            relational: Arc::new(FakeRelational {
                frame,
                delay,
                seen: Mutex::new(Vec::new()),
            }),
            connects: AtomicUsize::new(0),
        });
        let cache = Arc::new(ConnectionCache::new(connector.clone()));
        (QueryEngine::new(catalog(), cache, options), connector)
    }

    fn options() -> EngineOptions {
        EngineOptions {
            relational_uri: Some("postgresql://care:pw@localhost:5432/care".to_string()),
            document_uri: Some("mongodb://localhost:27017".to_string()),
            ..EngineOptions::default()
        }
    }

    fn doctor_context() -> ParameterContext {
        ParameterContext::new().with("doctor_id", 1).with("age_threshold", 85)
    }

    #[tokio::test]
    async fn test_run_renders_declared_chart() {
        let (engine, connector) = engine_with(patients_frame(), Duration::ZERO, options());

        let run = engine.run("Doctor: high-risk", &doctor_context()).await.unwrap();

        assert_eq!(run.row_count, 2);
        assert_eq!(run.backend, Backend::Relational);
        assert!(matches!(run.plan, RenderPlan::Chart { .. }));
        assert_eq!(
            connector.relational.seen.lock().unwrap()[0],
            vec![ParamValue::Integer(1), ParamValue::Integer(85)]
        );
    }

    #[tokio::test]
    async fn test_missing_parameter_fails_before_connecting() {
        let (engine, connector) = engine_with(patients_frame(), Duration::ZERO, options());
        let context = ParameterContext::new().with("doctor_id", 1);

        let err = engine.run("Doctor: high-risk", &context).await.unwrap_err();

        match err {
            EngineError::MissingParameter { parameter, query } => {
                assert_eq!(parameter, "age_threshold");
                assert_eq!(query, "Doctor: high-risk");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_result_is_no_rows_plan() {
        let empty = ResultFrame::new(vec!["patient".to_string(), "age".to_string()]);
        let (engine, _) = engine_with(empty, Duration::ZERO, options());

        let run = engine.run("Doctor: high-risk", &doctor_context()).await.unwrap();

        assert_eq!(run.row_count, 0);
        assert_eq!(
            run.plan,
            RenderPlan::NoRows {
                columns: vec!["patient".to_string(), "age".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_overrun_becomes_timeout() {
        let options = EngineOptions {
            query_timeout: Duration::from_millis(50),
            ..options()
        };
        let (engine, _) = engine_with(patients_frame(), Duration::from_millis(500), options);

        let err = engine.run("Doctor: high-risk", &doctor_context()).await.unwrap_err();

        assert!(matches!(err, EngineError::Execution(ExecutionError::Timeout(_))));
        assert_eq!(err.code(), "EXECUTION_TIMEOUT");
    }

    #[tokio::test]
    async fn test_connection_is_reused_across_runs() {
        let (engine, connector) = engine_with(patients_frame(), Duration::ZERO, options());

        engine.run("Doctor: high-risk", &doctor_context()).await.unwrap();
        engine.run("Mgr: staff", &ParameterContext::new()).await.unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_document_run_flattens_and_renders() {
        let (engine, _) = engine_with(patients_frame(), Duration::ZERO, options());

        let run = engine.run("Battery levels", &ParameterContext::new()).await.unwrap();

        assert_eq!(run.backend, Backend::Document);
        match run.plan {
            RenderPlan::Chart { frame, .. } => {
                assert_eq!(frame.columns(), &["_id.level", "count"]);
                assert_eq!(frame.row_count(), 2);
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_as_hides_other_roles_entries() {
        let (engine, connector) = engine_with(patients_frame(), Duration::ZERO, options());

        let err = engine
            .run_as("nurse", "Doctor: high-risk", &doctor_context())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Catalog(CatalogError::NotFound(_))));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);

        tokio_test::assert_ok!(
            engine
                .run_as("DOCTOR", "Doctor: high-risk", &doctor_context())
                .await
        );
    }

    #[tokio::test]
    async fn test_unknown_query_and_unconfigured_backend() {
        let (engine, _) = engine_with(
            patients_frame(),
            Duration::ZERO,
            EngineOptions {
                document_uri: None,
                ..options()
            },
        );

        let err = engine.run("No such query", &ParameterContext::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Catalog(CatalogError::NotFound(_))));

        let err = engine.run("Battery levels", &ParameterContext::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn test_list_visible_and_describe() {
        let (engine, _) = engine_with(patients_frame(), Duration::ZERO, options());

        let names: Vec<&str> = engine
            .list_visible("manager")
            .unwrap()
            .iter()
            .map(|d| d.name())
            .collect();
        assert_eq!(names, vec!["Mgr: staff", "Battery levels"]);

        let description = engine.describe("Doctor: high-risk").unwrap();
        assert_eq!(description.required_params, vec!["doctor_id", "age_threshold"]);
        assert_eq!(description.backend, Backend::Relational);
    }

    #[tokio::test]
    async fn test_document_overview() {
        let (engine, _) = engine_with(patients_frame(), Duration::ZERO, options());
        let overview = engine.document_overview().await.unwrap();
        assert_eq!(overview.database, "eldercare");
        assert_eq!(overview.collections, 4);
    }

    #[tokio::test]
    async fn test_aggregation_cache_can_be_disabled() {
        let (engine, _) = engine_with(
            patients_frame(),
            Duration::ZERO,
            EngineOptions {
                aggregation_cache_ttl: Duration::ZERO,
                ..options()
            },
        );
        assert!(engine.aggregation_cache().is_none());

        let (engine, _) = engine_with(patients_frame(), Duration::ZERO, options());
        engine.run("Battery levels", &ParameterContext::new()).await.unwrap();
        engine.run("Battery levels", &ParameterContext::new()).await.unwrap();
        assert_eq!(engine.aggregation_cache().unwrap().stats().hits, 1);
    }
}
