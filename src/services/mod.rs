pub mod chart_renderer;
pub mod connection_cache;
pub mod database; // PostgreSQL and MongoDB sessions
pub mod executor;
pub mod parameter_binder;
pub mod query_cache; // Aggregation result cache with LRU and TTL
pub mod query_engine;
pub mod role_filter;

pub use chart_renderer::ChartRenderer;
pub use connection_cache::{ConnectionCache, ConnectionKey};
pub use executor::{DocumentExecutor, QueryExecutor, RelationalExecutor};
pub use query_cache::{CacheStats, QueryResultCache};
pub use query_engine::{EngineOptions, QueryEngine};
