use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use super::chart::ChartSpec;
use crate::error::CatalogError;
use crate::validation::PlaceholderScanner;

/// Role tag that makes an entry visible to every role. As a caller role it
/// selects the catalog-wide view.
pub const ALL_ROLES: &str = "all";

/// Backend a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Relational,
    Document,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Relational => "relational",
            Backend::Document => "document",
        }
    }
}

/// Backend-specific query body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum QueryBody {
    /// SQL with `:name` placeholders. `{S}.` is replaced by the configured schema.
    Relational { sql: String },
    /// Aggregation stages run against `collection`, in order.
    Document {
        collection: String,
        pipeline: Vec<Value>,
    },
}

/// One pre-authored catalog entry. Immutable once the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    name: String,
    #[serde(flatten)]
    body: QueryBody,
    #[serde(default)]
    chart: ChartSpec,
    #[serde(default, alias = "tags")]
    roles: Vec<String>,
    #[serde(default, rename = "params")]
    required_params: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl QueryDefinition {
    pub fn relational(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::with_body(name, QueryBody::Relational { sql: sql.into() })
    }

    pub fn document(name: impl Into<String>, collection: impl Into<String>, pipeline: Vec<Value>) -> Self {
        Self::with_body(
            name,
            QueryBody::Document {
                collection: collection.into(),
                pipeline,
            },
        )
    }

    fn with_body(name: impl Into<String>, body: QueryBody) -> Self {
        Self {
            name: name.into(),
            body,
            chart: ChartSpec::Table,
            roles: Vec::new(),
            required_params: Vec::new(),
            description: None,
        }
    }

    pub fn with_chart(mut self, chart: ChartSpec) -> Self {
        self.chart = chart;
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> Backend {
        match self.body {
            QueryBody::Relational { .. } => Backend::Relational,
            QueryBody::Document { .. } => Backend::Document,
        }
    }

    pub fn body(&self) -> &QueryBody {
        &self.body
    }

    pub fn chart(&self) -> &ChartSpec {
        &self.chart
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn required_params(&self) -> &[String] {
        &self.required_params
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// True when the entry is tagged `all` or with `role` (case-insensitive).
    /// The caller role `all` sees every entry.
    pub fn is_visible_to(&self, role: &str) -> bool {
        let role = role.trim();
        if role.eq_ignore_ascii_case(ALL_ROLES) {
            return true;
        }
        self.roles
            .iter()
            .any(|r| r.eq_ignore_ascii_case(ALL_ROLES) || r.eq_ignore_ascii_case(role))
    }

    /// Lowercase role tags; an untagged entry is visible to all roles.
    fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        let mut roles: Vec<String> = Vec::new();
        for role in self.roles.drain(..) {
            let role = role.trim().to_lowercase();
            if !role.is_empty() && !roles.contains(&role) {
                roles.push(role);
            }
        }
        if roles.is_empty() {
            roles.push(ALL_ROLES.to_string());
        }
        self.roles = roles;
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::Invalid {
            query: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(CatalogError::Invalid {
                query: "<unnamed>".to_string(),
                reason: "query name cannot be empty".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for param in &self.required_params {
            if !seen.insert(param.as_str()) {
                return Err(invalid(&format!("parameter '{}' is declared twice", param)));
            }
        }

        let referenced = match &self.body {
            QueryBody::Relational { sql } => {
                if sql.trim().is_empty() {
                    return Err(invalid("SQL text cannot be empty"));
                }
                PlaceholderScanner::sql_placeholders(sql)
                    .map_err(|e| invalid(&format!("SQL text could not be tokenized: {}", e)))?
            }
            QueryBody::Document { collection, pipeline } => {
                if collection.trim().is_empty() {
                    return Err(invalid("collection cannot be empty"));
                }
                for stage in pipeline {
                    let is_stage = stage
                        .as_object()
                        .is_some_and(|m| m.len() == 1 && m.keys().all(|k| k.starts_with('$')));
                    if !is_stage {
                        return Err(invalid(
                            "each pipeline stage must be an object with a single '$' operator key",
                        ));
                    }
                }
                PlaceholderScanner::pipeline_placeholders(pipeline)
            }
        };

        if let Some(undeclared) = referenced.into_iter().find(|p| !seen.contains(p.as_str())) {
            return Err(CatalogError::UndeclaredPlaceholder {
                query: self.name.clone(),
                parameter: undeclared,
            });
        }

        if let ChartSpec::Treemap { path, .. } = &self.chart {
            if path.is_empty() {
                return Err(invalid("treemap path cannot be empty"));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    queries: Vec<QueryDefinition>,
}

/// Validated, read-only set of query definitions in authoring order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<QueryDefinition>,
}

impl Catalog {
    /// Validate and normalize definitions into a catalog.
    pub fn new(definitions: Vec<QueryDefinition>) -> Result<Self, CatalogError> {
        let mut names = HashSet::new();
        let mut entries = Vec::with_capacity(definitions.len());

        for mut definition in definitions {
            definition.normalize();
            definition.validate()?;
            if !names.insert(definition.name.clone()) {
                return Err(CatalogError::DuplicateName(definition.name));
            }
            entries.push(definition);
        }

        Ok(Self { entries })
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| CatalogError::Load(e.to_string()))?;
        Self::new(file.queries)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Load(format!("{}: {}", path.display(), e)))?;
        let catalog = Self::from_json_str(&json)?;
        tracing::info!(
            "Loaded {} catalog entries from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Result<&QueryDefinition, CatalogError> {
        self.entries
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| CatalogError::NotFound(name.to_string()))
    }

    pub fn entries(&self) -> &[QueryDefinition] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct role tags in first-seen order, excluding `all`.
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = Vec::new();
        for role in self.entries.iter().flat_map(|d| d.roles.iter()) {
            if role != ALL_ROLES && !roles.contains(&role.as_str()) {
                roles.push(role);
            }
        }
        roles
    }
}
