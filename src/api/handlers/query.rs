use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::api::handlers::AppState;
use crate::error::EngineError;
use crate::models::{ParameterContext, QueryRun};

#[derive(Debug, Default, Deserialize)]
pub struct RunQueryRequest {
    /// When set, the query must be visible to this role.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub params: ParameterContext,
}

/// Run a catalog entry and return its render plan
pub async fn run_query(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<RunQueryRequest>,
) -> Result<Json<QueryRun>, EngineError> {
    tracing::info!(
        "Running query '{}' with {} parameter(s)",
        name,
        payload.params.len()
    );

    let run = match payload.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(role) => state.engine.run_as(role, &name, &payload.params).await?,
        None => state.engine.run(&name, &payload.params).await?,
    };

    Ok(Json(run))
}
