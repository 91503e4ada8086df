use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::api::handlers::AppState;
use crate::error::EngineError;
use crate::models::QueryDescription;
use crate::services::database::DatabaseOverview;

#[derive(Debug, Serialize)]
pub struct RoleQueries {
    pub role: String,
    pub queries: Vec<QueryDescription>,
}

/// List the catalog entries a role may run
pub async fn list_role_queries(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> Result<Json<RoleQueries>, EngineError> {
    tracing::info!("Listing queries for role: {}", role);

    let queries = state
        .engine
        .list_visible(&role)?
        .into_iter()
        .map(QueryDescription::from)
        .collect();

    Ok(Json(RoleQueries {
        role: role.trim().to_lowercase(),
        queries,
    }))
}

pub async fn describe_query(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<QueryDescription>, EngineError> {
    Ok(Json(state.engine.describe(&name)?))
}

/// Summary of the configured document database
pub async fn document_overview(
    State(state): State<AppState>,
) -> Result<Json<DatabaseOverview>, EngineError> {
    Ok(Json(state.engine.document_overview().await?))
}
