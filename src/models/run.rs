use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::catalog::{Backend, QueryDefinition};
use super::chart::{ChartSpec, RenderPlan};

/// What a caller needs to know before running a catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescription {
    pub name: String,
    pub backend: Backend,
    pub required_params: Vec<String>,
    pub chart_spec: ChartSpec,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&QueryDefinition> for QueryDescription {
    fn from(definition: &QueryDefinition) -> Self {
        Self {
            name: definition.name().to_string(),
            backend: definition.backend(),
            required_params: definition.required_params().to_vec(),
            chart_spec: definition.chart().clone(),
            roles: definition.roles().to_vec(),
            description: definition.description().map(str::to_string),
        }
    }
}

/// One completed execution of a catalog entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRun {
    pub id: String,
    pub query: String,
    pub backend: Backend,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub executed_at: DateTime<Utc>,
    pub plan: RenderPlan,
}

impl QueryRun {
    pub fn new(definition: &QueryDefinition, row_count: usize, execution_time_ms: u64, plan: RenderPlan) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: definition.name().to_string(),
            backend: definition.backend(),
            row_count,
            execution_time_ms,
            executed_at: Utc::now(),
            plan,
        }
    }
}
