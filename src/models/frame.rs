use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{EngineError, Result};

/// Backend-agnostic tabular result.
///
/// Column names are unique and keep the order the backend returned them in.
/// Every row holds exactly one cell per column; a missing value is `Null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ResultFrame {
    /// Create a frame with the given columns and no rows.
    ///
    /// Duplicate names (e.g. two `name` columns from a join) are suffixed
    /// `_1`, `_2`, ... so that every column stays addressable.
    pub fn new(columns: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(columns.len());
        for column in columns {
            let mut candidate = column.clone();
            let mut n = 1;
            while unique.contains(&candidate) {
                candidate = format!("{}_{}", column, n);
                n += 1;
            }
            unique.push(candidate);
        }

        Self {
            columns: unique,
            rows: Vec::new(),
        }
    }

    /// Frame with neither columns nor rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a frame from flattened records, unioning column names in
    /// first-seen order and filling absent fields with `Null`.
    pub fn from_records(records: Vec<Vec<(String, Value)>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in &records {
            for (key, _) in record {
                if !index.contains_key(key) {
                    index.insert(key.clone(), columns.len());
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|record| {
                let mut row = vec![Value::Null; columns.len()];
                for (key, value) in record {
                    row[index[&key]] = value;
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    /// Append a row. The row must have one cell per column.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(EngineError::internal(format!(
                "row has {} cells but frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// True when the frame has no rows (it may still have columns).
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Names from `wanted` that this frame cannot resolve, in the given order.
    pub fn missing_columns<'a, I>(&self, wanted: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut missing: Vec<String> = Vec::new();
        for name in wanted {
            if !self.has_column(name) && !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
        }
        missing
    }

    /// Cell at `row` for the named column.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Row as (column, value) pairs in column order.
    pub fn record(&self, row: usize) -> Option<Vec<(&str, &Value)>> {
        self.rows.get(row).map(|cells| {
            self.columns
                .iter()
                .map(String::as_str)
                .zip(cells.iter())
                .collect()
        })
    }

    /// Apply `f` to every cell of the column at `idx`.
    pub(crate) fn map_column<F>(&mut self, idx: usize, mut f: F)
    where
        F: FnMut(&mut Value),
    {
        for row in &mut self.rows {
            if let Some(cell) = row.get_mut(idx) {
                f(cell);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicate_columns_are_suffixed() {
        let frame = ResultFrame::new(vec![
            "name".to_string(),
            "name".to_string(),
            "age".to_string(),
            "name".to_string(),
        ]);
        assert_eq!(frame.columns(), &["name", "name_1", "age", "name_2"]);
    }

    #[test]
    fn test_push_row_checks_width() {
        let mut frame = ResultFrame::new(vec!["a".to_string(), "b".to_string()]);
        assert!(frame.push_row(vec![json!(1), json!(2)]).is_ok());
        assert!(frame.push_row(vec![json!(1)]).is_err());
        assert_eq!(frame.row_count(), 1);
    }

    #[test]
    fn test_empty_frame_keeps_columns() {
        let frame = ResultFrame::new(vec!["patient".to_string(), "age".to_string()]);
        assert!(frame.is_empty());
        assert_eq!(frame.column_count(), 2);

        let bare = ResultFrame::empty();
        assert!(bare.is_empty());
        assert_eq!(bare.column_count(), 0);
    }

    #[test]
    fn test_from_records_unions_columns() {
        let frame = ResultFrame::from_records(vec![
            vec![("id".to_string(), json!(1)), ("a.b".to_string(), json!("x"))],
            vec![("id".to_string(), json!(2)), ("a.c".to_string(), json!(true))],
        ]);

        assert_eq!(frame.columns(), &["id", "a.b", "a.c"]);
        assert_eq!(frame.value(0, "a.c"), Some(&Value::Null));
        assert_eq!(frame.value(1, "a.b"), Some(&Value::Null));
        assert_eq!(frame.value(1, "a.c"), Some(&json!(true)));
    }

    #[test]
    fn test_missing_columns_preserves_order() {
        let frame = ResultFrame::new(vec!["patient".to_string()]);
        let missing = frame.missing_columns(["patient", "age", "room_no", "age"]);
        assert_eq!(missing, vec!["age".to_string(), "room_no".to_string()]);
    }

    #[test]
    fn test_record_follows_column_order() {
        let mut frame = ResultFrame::new(vec!["b".to_string(), "a".to_string()]);
        frame.push_row(vec![json!(2), json!(1)]).unwrap();
        let record = frame.record(0).unwrap();
        assert_eq!(record, vec![("b", &json!(2)), ("a", &json!(1))]);
    }
}
