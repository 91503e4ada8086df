use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{catalog, query, AppState};
use crate::services::QueryEngine;

/// Create the application router around a shared engine
pub fn create_router(engine: Arc<QueryEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/roles/{role}/queries", get(catalog::list_role_queries))
        .route("/api/queries/{name}", get(catalog::describe_query))
        .route("/api/queries/{name}/run", post(query::run_query))
        .route("/api/document/overview", get(catalog::document_overview))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::{Backend, Catalog, ParamValue, QueryDefinition, ResultFrame};
    use crate::services::database::{ConnectionHandle, Connector, RelationalSession};
    use crate::services::{ConnectionCache, EngineOptions};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct RosterSession;

    #[async_trait::async_trait]
    impl RelationalSession for RosterSession {
        async fn query(&self, _sql: &str, params: &[ParamValue]) -> Result<ResultFrame> {
            let mut frame = ResultFrame::new(vec!["patient".to_string(), "doctor_id".to_string()]);
            frame.push_row(vec![json!("Ana"), json!(params[0].to_string())])?;
            Ok(frame)
        }
    }

    struct RosterConnector;

    #[async_trait::async_trait]
    impl Connector for RosterConnector {
        async fn connect(&self, _backend: Backend, _uri: &str) -> Result<ConnectionHandle> {
            Ok(ConnectionHandle::Relational(Arc::new(RosterSession)))
        }
    }

    fn app() -> Router {
        let catalog = Catalog::new(vec![
            QueryDefinition::relational(
                "Doctor: patients",
                "SELECT name AS patient, doctor_id FROM {S}.patients WHERE doctor_id = :doctor_id",
            )
            .with_params(["doctor_id"])
            .with_roles(["doctor"]),
            QueryDefinition::relational("Mgr: staff", "SELECT 1").with_roles(["manager"]),
        ])
        .unwrap();
        let options = EngineOptions {
            relational_uri: Some("postgresql://localhost/care".to_string()),
            ..EngineOptions::default()
        };
        let engine = QueryEngine::new(
            catalog,
            Arc::new(ConnectionCache::new(Arc::new(RosterConnector))),
            options,
        );
        create_router(Arc::new(engine))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_role_queries() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/roles/Doctor/queries")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["role"], "doctor");
        assert_eq!(body["queries"].as_array().unwrap().len(), 1);
        assert_eq!(body["queries"][0]["name"], "Doctor: patients");
        assert_eq!(body["queries"][0]["requiredParams"], json!(["doctor_id"]));
    }

    #[tokio::test]
    async fn test_role_without_entries_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/roles/pharmacist/queries")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "NO_ENTRIES_FOR_ROLE");
    }

    #[tokio::test]
    async fn test_describe_unknown_query() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/queries/Nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "QUERY_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_run_query_returns_plan() {
        let response = app()
            .oneshot(post_json(
                "/api/queries/Doctor%3A%20patients/run",
                json!({"role": "doctor", "params": {"doctor_id": 7}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["query"], "Doctor: patients");
        assert_eq!(body["rowCount"], 1);
        assert_eq!(body["plan"]["kind"], "table");
        assert_eq!(body["plan"]["frame"]["rows"][0], json!(["Ana", "7"]));
    }

    #[tokio::test]
    async fn test_run_query_missing_parameter() {
        let response = app()
            .oneshot(post_json("/api/queries/Doctor%3A%20patients/run", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "MISSING_PARAMETER");
    }

    #[tokio::test]
    async fn test_run_query_hidden_from_role() {
        let response = app()
            .oneshot(post_json(
                "/api/queries/Mgr%3A%20staff/run",
                json!({"role": "nurse"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_document_overview_without_backend() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/document/overview")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"]["code"], "CONFIG_ERROR");
    }
}
