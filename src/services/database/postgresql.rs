// PostgreSQL session using connection pooling for the relational backend
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde_json::{json, Number, Value};
use std::time::Instant;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{NoTls, Row};
use url::Url;

use super::adapter::RelationalSession;
use super::{mask_credentials, normalize_uri};
use crate::error::{EngineError, Result};
use crate::models::{ParamValue, ResultFrame};

type BoxedParam = Box<dyn ToSql + Sync + Send>;

pub struct PostgreSQLSession {
    pool: Pool,
    masked_url: String,
}

impl PostgreSQLSession {
    /// Build a pool for `connection_url` and check out one connection so an
    /// unreachable host or bad credentials fail here rather than on first query.
    pub async fn connect(connection_url: &str, max_pool_size: usize) -> Result<Self> {
        let connection_url = normalize_uri(connection_url);
        let url = Url::parse(&connection_url)
            .map_err(|e| EngineError::connection(format!("Invalid PostgreSQL URL: {}", e)))?;

        if url.scheme() != "postgresql" && url.scheme() != "postgres" {
            return Err(EngineError::connection(
                "URL must use postgresql:// or postgres:// scheme",
            ));
        }

        let masked_url = mask_credentials(&connection_url);
        tracing::info!(
            "Creating PostgreSQL pool for: {} (max_size: {})",
            masked_url,
            max_pool_size
        );

        let mut cfg = PoolConfig::new();
        cfg.url = Some(connection_url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| EngineError::connection(format!("Failed to create connection pool: {}", e)))?;
        pool.resize(max_pool_size);

        let _checkout = pool
            .get()
            .await
            .map_err(|e| EngineError::connection(format!("Failed to connect to {}: {}", masked_url, e)))?;

        Ok(Self { pool, masked_url })
    }

    fn describe_error(e: &tokio_postgres::Error) -> String {
        match e.as_db_error() {
            Some(db_error) => {
                let mut msg = format!(
                    "Code: {}, Message: {}",
                    db_error.code().code(),
                    db_error.message()
                );
                if let Some(detail) = db_error.detail() {
                    msg.push_str(&format!(", Detail: {}", detail));
                }
                if let Some(hint) = db_error.hint() {
                    msg.push_str(&format!(", Hint: {}", hint));
                }
                msg
            }
            None => e.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl RelationalSession for PostgreSQLSession {
    async fn query(&self, sql: &str, params: &[ParamValue]) -> Result<ResultFrame> {
        let client = self.pool.get().await.map_err(|e| {
            EngineError::connection(format!(
                "Failed to get connection from pool for {}: {}",
                self.masked_url, e
            ))
        })?;

        let start_time = Instant::now();

        let statement = client
            .prepare_cached(sql)
            .await
            .map_err(|e| EngineError::execution(Self::describe_error(&e)))?;

        if statement.params().len() != params.len() {
            return Err(EngineError::execution(format!(
                "statement expects {} parameters but {} were bound",
                statement.params().len(),
                params.len()
            )));
        }

        let bound: Vec<BoxedParam> = params
            .iter()
            .zip(statement.params())
            .map(|(value, ty)| bind_param(value, ty))
            .collect::<Result<_>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = client
            .query(&statement, &refs)
            .await
            .map_err(|e| EngineError::execution(Self::describe_error(&e)))?;

        let mut frame = ResultFrame::new(
            statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        );
        for row in &rows {
            let cells = row
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, column)| cell_to_json(row, idx, column.type_()))
                .collect();
            frame.push_row(cells)?;
        }

        tracing::debug!(
            "PostgreSQL query returned {} rows in {} ms",
            frame.row_count(),
            start_time.elapsed().as_millis()
        );

        Ok(frame)
    }
}

fn is_textual(ty: &Type) -> bool {
    matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN)
}

/// Convert a caller value into the Rust type the prepared statement expects
/// for that parameter slot.
fn bind_param(value: &ParamValue, ty: &Type) -> Result<BoxedParam> {
    let mismatch = || {
        EngineError::execution(format!(
            "cannot bind {} value '{}' to parameter of type {}",
            value.type_name(),
            value,
            ty.name()
        ))
    };

    let param: BoxedParam = match (value, ty) {
        (ParamValue::Integer(v), &Type::INT2) => Box::new(i16::try_from(*v).map_err(|_| mismatch())?),
        (ParamValue::Integer(v), &Type::INT4) => Box::new(i32::try_from(*v).map_err(|_| mismatch())?),
        (ParamValue::Integer(v), &Type::INT8) => Box::new(*v),
        (ParamValue::Integer(v), &Type::FLOAT4) => Box::new(*v as f32),
        (ParamValue::Integer(v), &Type::FLOAT8) => Box::new(*v as f64),
        (ParamValue::Date(d), &Type::DATE) => Box::new(*d),
        (ParamValue::Date(d), &Type::TIMESTAMP) => {
            Box::new(d.and_hms_opt(0, 0, 0).ok_or_else(mismatch)?)
        }
        (ParamValue::Date(d), &Type::TIMESTAMPTZ) => {
            Box::new(d.and_hms_opt(0, 0, 0).ok_or_else(mismatch)?.and_utc())
        }
        (ParamValue::Text(s), t) if is_textual(t) => Box::new(s.clone()),
        // Integers and dates used in text context, e.g. `(:days || ' days')::interval`.
        (other, t) if is_textual(t) => Box::new(other.to_string()),
        _ => return Err(mismatch()),
    };

    Ok(param)
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Convert one cell to JSON, keeping numbers numeric and rendering
/// temporal types as ISO-8601 text.
fn cell_to_json(row: &Row, idx: usize, ty: &Type) -> Value {
    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx).map(|v| json!(v)),
        Type::INT4 => get::<i32>(row, idx).map(|v| json!(v)),
        Type::INT8 => get::<i64>(row, idx).map(|v| json!(v)),
        Type::OID => get::<u32>(row, idx).map(|v| json!(v)),
        Type::FLOAT4 => get::<f32>(row, idx).map(|v| float(v as f64)),
        Type::FLOAT8 => get::<f64>(row, idx).map(float),
        Type::NUMERIC => get::<Decimal>(row, idx).map(numeric_to_json),
        Type::DATE => get::<NaiveDate>(row, idx).map(|d| json!(d.format("%Y-%m-%d").to_string())),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)
            .map(|t| json!(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx).map(|t| json!(t.to_rfc3339())),
        Type::JSON | Type::JSONB => get::<Value>(row, idx),
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Value::String),
            Err(_) => {
                tracing::warn!(
                    "Unsupported column type {} at index {}, using placeholder",
                    ty.name(),
                    idx
                );
                Some(json!(format!("<{}>", ty.name())))
            }
        },
    };

    value.unwrap_or(Value::Null)
}

/// NUMERIC to a JSON number, going through the decimal's text so the
/// result is the closest f64 rather than an accumulated sum.
fn numeric_to_json(value: Decimal) -> Value {
    value
        .to_string()
        .parse::<f64>()
        .map(float)
        .unwrap_or(Value::Null)
}
