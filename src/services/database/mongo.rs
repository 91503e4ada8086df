// MongoDB session for the document backend, plus the pure conversions the
// document executor needs: pipeline binding (JSON -> BSON) and flattening
// returned documents into a result frame.
use chrono::{DateTime, TimeDelta, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::Client;
use serde_json::{Map, Number, Value};

use super::adapter::{DatabaseOverview, DocumentSession};
use super::mask_credentials;
use crate::error::{EngineError, Result};
use crate::models::{BoundParams, ParamValue, ResultFrame};
use crate::validation::PlaceholderScanner;

/// Client-side operator resolved to `now - duration` when a pipeline is bound.
pub const RELATIVE_TIME_OPERATOR: &str = "$ago";

pub struct MongoSession {
    client: Client,
}

impl MongoSession {
    /// Create a client and ping the server; the driver itself connects lazily.
    pub async fn connect(uri: &str) -> Result<Self> {
        let masked = mask_credentials(uri);
        tracing::info!("Creating MongoDB client for: {}", masked);

        let client = Client::with_uri_str(uri.trim())
            .await
            .map_err(|e| EngineError::connection(format!("Invalid MongoDB URI {}: {}", masked, e)))?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| EngineError::connection(format!("Failed to reach {}: {}", masked, e)))?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl DocumentSession for MongoSession {
    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>> {
        let cursor = self
            .client
            .database(database)
            .collection::<Document>(collection)
            .aggregate(pipeline)
            .allow_disk_use(true)
            .await
            .map_err(|e| EngineError::execution(e.to_string()))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| EngineError::execution(e.to_string()))
    }

    async fn overview(&self, database: &str) -> Result<DatabaseOverview> {
        let db = self.client.database(database);

        let build_info = self
            .client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 })
            .await
            .map_err(|e| EngineError::execution(e.to_string()))?;
        let version = build_info.get_str("version").unwrap_or("unknown").to_string();

        let names = db
            .list_collection_names()
            .await
            .map_err(|e| EngineError::execution(e.to_string()))?;

        let mut estimated_documents = 0u64;
        for name in &names {
            estimated_documents += db
                .collection::<Document>(name)
                .estimated_document_count()
                .await
                .map_err(|e| EngineError::execution(e.to_string()))?;
        }

        let stats = db
            .run_command(doc! { "dbStats": 1 })
            .await
            .map_err(|e| EngineError::execution(e.to_string()))?;
        let storage_bytes = match stats.get("storageSize") {
            Some(Bson::Int32(v)) => *v as f64,
            Some(Bson::Int64(v)) => *v as f64,
            Some(Bson::Double(v)) => *v,
            _ => 0.0,
        };

        Ok(DatabaseOverview {
            database: database.to_string(),
            collections: names.len(),
            estimated_documents,
            storage_mb: (storage_bytes / 1024.0 / 1024.0 * 10.0).round() / 10.0,
            version,
        })
    }
}

/// Convert authored pipeline stages to BSON, substituting `":name"` values
/// from `params` and resolving `{"$ago": {...}}` against `now`.
pub fn bind_pipeline(
    query: &str,
    stages: &[Value],
    params: &BoundParams,
    now: DateTime<Utc>,
) -> Result<Vec<Document>> {
    stages
        .iter()
        .map(|stage| match json_to_bson(query, stage, params, now)? {
            Bson::Document(doc) => Ok(doc),
            other => Err(EngineError::execution(format!(
                "pipeline stage must be a document, got {}",
                other
            ))),
        })
        .collect()
}

fn json_to_bson(query: &str, value: &Value, params: &BoundParams, now: DateTime<Utc>) -> Result<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => number_to_bson(n),
        Value::String(s) => match PlaceholderScanner::pipeline_placeholder(s) {
            Some(name) => params
                .get(name)
                .map(param_to_bson)
                .ok_or_else(|| EngineError::missing_parameter(name, query))?,
            None => Bson::String(s.clone()),
        },
        Value::Array(items) => Bson::Array(
            items
                .iter()
                .map(|v| json_to_bson(query, v, params, now))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => {
            if let Some(spec) = relative_time_spec(map) {
                return resolve_relative_time(spec, now);
            }
            let mut doc = Document::new();
            for (key, v) in map {
                doc.insert(key.clone(), json_to_bson(query, v, params, now)?);
            }
            Bson::Document(doc)
        }
    })
}

fn number_to_bson(n: &Number) -> Bson {
    if let Some(i) = n.as_i64() {
        match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        }
    } else {
        Bson::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn param_to_bson(value: &ParamValue) -> Bson {
    match value {
        ParamValue::Integer(i) => match i32::try_from(*i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(*i),
        },
        ParamValue::Text(s) => Bson::String(s.clone()),
        ParamValue::Date(d) => {
            let millis = d
                .and_hms_opt(0, 0, 0)
                .map(|t| t.and_utc().timestamp_millis())
                .unwrap_or_default();
            Bson::DateTime(bson::DateTime::from_millis(millis))
        }
    }
}

fn relative_time_spec(map: &Map<String, Value>) -> Option<&Value> {
    if map.len() == 1 {
        map.get(RELATIVE_TIME_OPERATOR)
    } else {
        None
    }
}

fn resolve_relative_time(spec: &Value, now: DateTime<Utc>) -> Result<Bson> {
    let invalid = || {
        EngineError::execution(format!(
            "{} expects an object of integer days/hours/minutes/seconds, got {}",
            RELATIVE_TIME_OPERATOR, spec
        ))
    };

    let fields = spec.as_object().ok_or_else(invalid)?;
    let mut offset = TimeDelta::zero();
    for (unit, amount) in fields {
        let amount = amount.as_i64().ok_or_else(invalid)?;
        let delta = match unit.as_str() {
            "days" => TimeDelta::try_days(amount),
            "hours" => TimeDelta::try_hours(amount),
            "minutes" => TimeDelta::try_minutes(amount),
            "seconds" => TimeDelta::try_seconds(amount),
            _ => None,
        }
        .ok_or_else(invalid)?;
        offset = offset.checked_add(&delta).ok_or_else(invalid)?;
    }

    let at = now.checked_sub_signed(offset).ok_or_else(invalid)?;
    Ok(Bson::DateTime(bson::DateTime::from_millis(at.timestamp_millis())))
}

/// Flatten documents into a frame. Nested documents become dotted column
/// names; columns are unioned across documents with `Null` for gaps.
pub fn flatten_documents(docs: &[Document]) -> ResultFrame {
    let records = docs
        .iter()
        .map(|doc| {
            let mut record = Vec::new();
            flatten_into(doc, "", &mut record);
            record
        })
        .collect();
    ResultFrame::from_records(records)
}

fn flatten_into(doc: &Document, prefix: &str, out: &mut Vec<(String, Value)>) {
    for (key, value) in doc {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Bson::Document(inner) if !inner.is_empty() => flatten_into(inner, &path, out),
            other => out.push((path, bson_to_json(other))),
        }
    }
}

/// BSON leaf to JSON. Dates become RFC 3339 text and object ids hex.
pub fn bson_to_json(value: &Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(v) => Value::from(*v),
        Bson::Int64(v) => Value::from(*v),
        Bson::Double(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s.clone()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => dt
            .try_to_rfc3339_string()
            .map(Value::String)
            .unwrap_or_else(|_| Value::from(dt.timestamp_millis())),
        Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(k, v)| (k.clone(), bson_to_json(v)))
                .collect(),
        ),
        other => other.clone().into_relaxed_extjson(),
    }
}
