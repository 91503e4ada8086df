use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::frame::ResultFrame;

/// One y column or several (grouped bars, multi-line charts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YColumns {
    One(String),
    Many(Vec<String>),
}

impl YColumns {
    pub fn names(&self) -> Vec<&str> {
        match self {
            YColumns::One(c) => vec![c.as_str()],
            YColumns::Many(cs) => cs.iter().map(String::as_str).collect(),
        }
    }
}

/// Axis mapping shared by line, bar and scatter charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XyChart {
    pub x: String,
    pub y: YColumns,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_y: Option<String>,
}

impl XyChart {
    fn referenced(&self) -> Vec<&str> {
        let mut cols = vec![self.x.as_str()];
        cols.extend(self.y.names());
        cols.extend(self.color.as_deref());
        cols.extend(self.size.as_deref());
        cols.extend(self.secondary_y.as_deref());
        cols
    }
}

/// Declared visualization for a catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChartSpec {
    Table,
    Line(XyChart),
    Bar(XyChart),
    Scatter(XyChart),
    Pie {
        names: String,
        values: String,
    },
    /// Pivot of `values` over `rows` x `cols`, averaged per cell.
    Heatmap {
        rows: String,
        cols: String,
        values: String,
    },
    Treemap {
        path: Vec<String>,
        values: String,
    },
}

impl Default for ChartSpec {
    fn default() -> Self {
        ChartSpec::Table
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Table,
    Line,
    Bar,
    Scatter,
    Pie,
    Heatmap,
    Treemap,
}

impl ChartSpec {
    pub fn kind(&self) -> ChartKind {
        match self {
            ChartSpec::Table => ChartKind::Table,
            ChartSpec::Line(_) => ChartKind::Line,
            ChartSpec::Bar(_) => ChartKind::Bar,
            ChartSpec::Scatter(_) => ChartKind::Scatter,
            ChartSpec::Pie { .. } => ChartKind::Pie,
            ChartSpec::Heatmap { .. } => ChartKind::Heatmap,
            ChartSpec::Treemap { .. } => ChartKind::Treemap,
        }
    }

    /// Every column name this spec needs from a result frame.
    pub fn referenced_columns(&self) -> Vec<&str> {
        match self {
            ChartSpec::Table => Vec::new(),
            ChartSpec::Line(xy) | ChartSpec::Bar(xy) | ChartSpec::Scatter(xy) => xy.referenced(),
            ChartSpec::Pie { names, values } => vec![names.as_str(), values.as_str()],
            ChartSpec::Heatmap { rows, cols, values } => {
                vec![rows.as_str(), cols.as_str(), values.as_str()]
            }
            ChartSpec::Treemap { path, values } => {
                let mut cols: Vec<&str> = path.iter().map(String::as_str).collect();
                cols.push(values.as_str());
                cols
            }
        }
    }
}

/// Inferred content of a column after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Number,
    Text,
    Timestamp,
    Boolean,
    Mixed,
    Empty,
}

/// A declared chart could not be honored; a table was drawn instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderFallback {
    pub requested: ChartKind,
    pub missing_columns: Vec<String>,
}

/// Averaged pivot for heatmaps. `None` cells had no source rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapMatrix {
    pub row_column: String,
    pub col_column: String,
    pub value_column: String,
    pub row_labels: Vec<Value>,
    pub col_labels: Vec<Value>,
    pub cells: Vec<Vec<Option<f64>>>,
}

impl HeatmapMatrix {
    pub fn cell(&self, row: &Value, col: &Value) -> Option<f64> {
        let r = self.row_labels.iter().position(|l| l == row)?;
        let c = self.col_labels.iter().position(|l| l == col)?;
        self.cells[r][c]
    }
}

/// What the rendering layer should draw, and from which data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderPlan {
    /// Query succeeded with zero rows; nothing to chart.
    NoRows { columns: Vec<String> },
    Table {
        frame: ResultFrame,
        column_kinds: Vec<ColumnKind>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<RenderFallback>,
    },
    Chart {
        spec: ChartSpec,
        frame: ResultFrame,
        column_kinds: Vec<ColumnKind>,
    },
    Heatmap { matrix: HeatmapMatrix },
}

impl RenderPlan {
    pub fn fallback(&self) -> Option<&RenderFallback> {
        match self {
            RenderPlan::Table { fallback, .. } => fallback.as_ref(),
            _ => None,
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, RenderPlan::Table { .. })
    }
}
