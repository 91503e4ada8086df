// Map a result frame onto the chart a catalog entry declares.
//
// Rendering never fails: an empty frame yields a "no rows" plan and a chart
// whose columns cannot be resolved degrades to a table that reports what
// was missing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::{ChartSpec, ColumnKind, HeatmapMatrix, RenderFallback, RenderPlan, ResultFrame};

const AWARE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"];
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub struct ChartRenderer;

impl ChartRenderer {
    pub fn render(frame: ResultFrame, spec: &ChartSpec) -> RenderPlan {
        if frame.is_empty() {
            return RenderPlan::NoRows {
                columns: frame.columns().to_vec(),
            };
        }

        let mut frame = frame;
        let timestamps = normalize_timestamps(&mut frame);
        let column_kinds = column_kinds(&frame, &timestamps);

        let missing = frame.missing_columns(spec.referenced_columns());
        if !missing.is_empty() {
            tracing::warn!(
                "Cannot draw {:?} chart, missing column(s) {:?}; showing table",
                spec.kind(),
                missing
            );
            return RenderPlan::Table {
                frame,
                column_kinds,
                fallback: Some(RenderFallback {
                    requested: spec.kind(),
                    missing_columns: missing,
                }),
            };
        }

        match spec {
            ChartSpec::Table => RenderPlan::Table {
                frame,
                column_kinds,
                fallback: None,
            },
            ChartSpec::Heatmap { rows, cols, values } => RenderPlan::Heatmap {
                matrix: pivot_mean(&frame, rows, cols, values),
            },
            _ => RenderPlan::Chart {
                spec: spec.clone(),
                frame,
                column_kinds,
            },
        }
    }
}

/// Parse one text cell as a timestamp and return its canonical ISO 8601 form.
/// Offsets are converted to UTC; naive values keep no zone.
pub fn normalize_timestamp(text: &str) -> Option<String> {
    let text = text.trim();
    if text.len() < 10 {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::AutoSi, true));
    }
    for fmt in AWARE_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::AutoSi, true));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

// A column converts only when every non-null cell is text that parses.
fn normalize_timestamps(frame: &mut ResultFrame) -> HashSet<usize> {
    let mut converted = HashSet::new();

    for idx in 0..frame.column_count() {
        let mut normalized: Vec<Option<String>> = Vec::with_capacity(frame.row_count());
        let mut any = false;
        let mut all_parse = true;
        for row in frame.rows() {
            match &row[idx] {
                Value::Null => normalized.push(None),
                Value::String(s) => match normalize_timestamp(s) {
                    Some(ts) => {
                        any = true;
                        normalized.push(Some(ts));
                    }
                    None => {
                        all_parse = false;
                        break;
                    }
                },
                _ => {
                    all_parse = false;
                    break;
                }
            }
        }

        if any && all_parse {
            let mut values = normalized.into_iter();
            frame.map_column(idx, |cell| {
                if let Some(Some(ts)) = values.next() {
                    *cell = Value::String(ts);
                }
            });
            converted.insert(idx);
        }
    }

    converted
}

fn column_kinds(frame: &ResultFrame, timestamps: &HashSet<usize>) -> Vec<ColumnKind> {
    (0..frame.column_count())
        .map(|idx| {
            if timestamps.contains(&idx) {
                return ColumnKind::Timestamp;
            }
            let mut kind: Option<ColumnKind> = None;
            for row in frame.rows() {
                let cell_kind = match &row[idx] {
                    Value::Null => continue,
                    Value::Number(_) => ColumnKind::Number,
                    Value::String(_) => ColumnKind::Text,
                    Value::Bool(_) => ColumnKind::Boolean,
                    Value::Array(_) | Value::Object(_) => return ColumnKind::Mixed,
                };
                match kind {
                    None => kind = Some(cell_kind),
                    Some(k) if k != cell_kind => return ColumnKind::Mixed,
                    Some(_) => {}
                }
            }
            kind.unwrap_or(ColumnKind::Empty)
        })
        .collect()
}

// Numbers first (numerically), then text, then anything else by its JSON form.
fn label_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            _ => 2,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)).then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

/// Identity of a label: numbers match by exact value, so `1` and `1.0` are
/// one label while large integers that share an f64 stay apart.
#[derive(Debug, PartialEq, Eq, Hash)]
enum LabelKey {
    Integer(i128),
    Float(u64),
    Text(String),
    Other(String),
}

fn label_key(value: &Value) -> LabelKey {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                LabelKey::Integer(i as i128)
            } else if let Some(u) = n.as_u64() {
                LabelKey::Integer(u as i128)
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.fract() == 0.0 && f.abs() < 1e38 {
                    LabelKey::Integer(f as i128)
                } else {
                    LabelKey::Float(f.to_bits())
                }
            }
        }
        Value::String(s) => LabelKey::Text(s.clone()),
        other => LabelKey::Other(other.to_string()),
    }
}

// First spelling of each label wins.
fn sorted_labels<'a>(labels: impl Iterator<Item = &'a Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut out: Vec<Value> = labels.filter(|v| seen.insert(label_key(v))).cloned().collect();
    out.sort_by(label_order);
    out
}

/// Average `values` over each (`rows`, `cols`) pair. Rows with a null label
/// are dropped and non-numeric values are ignored; a cell with no numeric
/// contribution is `None`.
pub fn pivot_mean(frame: &ResultFrame, rows: &str, cols: &str, values: &str) -> HeatmapMatrix {
    let (Some(ri), Some(ci), Some(vi)) = (
        frame.column_index(rows),
        frame.column_index(cols),
        frame.column_index(values),
    ) else {
        return HeatmapMatrix {
            row_column: rows.to_string(),
            col_column: cols.to_string(),
            value_column: values.to_string(),
            row_labels: Vec::new(),
            col_labels: Vec::new(),
            cells: Vec::new(),
        };
    };

    let labelled: Vec<&Vec<Value>> = frame
        .rows()
        .iter()
        .filter(|r| !r[ri].is_null() && !r[ci].is_null())
        .collect();

    let row_labels = sorted_labels(labelled.iter().map(|r| &r[ri]));
    let col_labels = sorted_labels(labelled.iter().map(|r| &r[ci]));
    let row_index: HashMap<LabelKey, usize> = row_labels
        .iter()
        .enumerate()
        .map(|(i, v)| (label_key(v), i))
        .collect();
    let col_index: HashMap<LabelKey, usize> = col_labels
        .iter()
        .enumerate()
        .map(|(i, v)| (label_key(v), i))
        .collect();

    let mut sums = vec![vec![(0.0f64, 0u32); col_labels.len()]; row_labels.len()];
    for row in labelled {
        let Some(value) = row[vi].as_f64() else {
            continue;
        };
        let (Some(&r), Some(&c)) = (
            row_index.get(&label_key(&row[ri])),
            col_index.get(&label_key(&row[ci])),
        ) else {
            continue;
        };
        sums[r][c].0 += value;
        sums[r][c].1 += 1;
    }

    let cells = sums
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(sum, n)| (n > 0).then(|| sum / n as f64))
                .collect()
        })
        .collect();

    HeatmapMatrix {
        row_column: rows.to_string(),
        col_column: cols.to_string(),
        value_column: values.to_string(),
        row_labels,
        col_labels,
        cells,
    }
}
