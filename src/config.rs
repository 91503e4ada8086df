use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::services::EngineOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub catalog: CatalogConfig,
    pub relational: RelationalConfig,
    pub document: DocumentConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationalConfig {
    pub uri: Option<String>,
    pub schema: String,
    pub max_pool_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentConfig {
    pub uri: Option<String>,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub query_timeout_secs: u64,
    pub aggregation_cache_ttl_secs: u64,
    pub aggregation_cache_max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Environment variable -> config key.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("CATALOG_PATH", "catalog.path"),
    ("PG_URI", "relational.uri"),
    ("PG_SCHEMA", "relational.schema"),
    ("PG_MAX_POOL_SIZE", "relational.max_pool_size"),
    ("MONGO_URI", "document.uri"),
    ("MONGO_DB", "document.database"),
    ("QUERY_TIMEOUT_SECS", "engine.query_timeout_secs"),
    ("AGG_CACHE_TTL_SECS", "engine.aggregation_cache_ttl_secs"),
    ("AGG_CACHE_MAX_ENTRIES", "engine.aggregation_cache_max_entries"),
    ("RUST_LOG", "logging.level"),
];

impl Config {
    /// Defaults, then `.env`, then process environment.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from defaults plus whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, config::ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_pool = (num_cpus::get() * 2).max(4) as i64;

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("catalog.path", "catalog/eldercare.json")?
            .set_default("relational.schema", "public")?
            .set_default("relational.max_pool_size", default_pool)?
            .set_default("document.database", "eldercare")?
            .set_default("engine.query_timeout_secs", 30)?
            .set_default("engine.aggregation_cache_ttl_secs", 60)?
            .set_default("engine.aggregation_cache_max_entries", 256)?
            .set_default("logging.level", "info")?;

        // A variable that is set wins even when empty: `PG_SCHEMA=` means no schema.
        for (var, key) in ENV_OVERRIDES {
            if let Some(value) = lookup(var) {
                builder = builder.set_override(*key, value.trim().to_string())?;
            }
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        let schema = &self.relational.schema;
        let valid_schema = schema.is_empty()
            || (schema.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        if !valid_schema {
            return Err(config::ConfigError::Message(format!(
                "relational.schema '{}' is not a plain identifier",
                schema
            )));
        }
        if self.engine.query_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "engine.query_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.relational.max_pool_size == 0 {
            return Err(config::ConfigError::Message(
                "relational.max_pool_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            relational_uri: non_blank(&self.relational.uri),
            relational_schema: self.relational.schema.clone(),
            document_uri: non_blank(&self.document.uri),
            document_database: self.document.database.clone(),
            query_timeout: Duration::from_secs(self.engine.query_timeout_secs),
            aggregation_cache_ttl: Duration::from_secs(self.engine.aggregation_cache_ttl_secs),
            aggregation_cache_max_entries: self.engine.aggregation_cache_max_entries,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}
