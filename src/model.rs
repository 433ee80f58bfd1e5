/// NodeSample, NodeTimeSeries, Quantity, PipelineError
/// core data structures and error handling
///
/// Core data types for the stormwater scenario comparison pipeline.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O; the only logic is unit conversion and the small
/// accessors every stage needs.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Unit conversion
// ---------------------------------------------------------------------------

/// Feet to meters: 12 in/ft × 2.54 cm/in ÷ 100 cm/m.
pub const FT_TO_M: f64 = 12.0 * 2.54 / 100.0;

/// Cubic feet to cubic meters (also cfs to cms): (12 × 2.54 ÷ 100)³.
pub const CF_TO_CM: f64 = (12.0 * 12.0 * 12.0) * (2.54 * 2.54 * 2.54) / (100.0 * 100.0 * 100.0);

// ---------------------------------------------------------------------------
// Measured quantities
// ---------------------------------------------------------------------------

/// The three per-node quantities recorded at every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quantity {
    Depth,
    Flow,
    Volume,
}

impl Quantity {
    pub const ALL: [Quantity; 3] = [Quantity::Depth, Quantity::Flow, Quantity::Volume];

    /// Column suffix used in the combined per-step table, e.g. `J12-S_depth`.
    pub fn suffix(self) -> &'static str {
        match self {
            Quantity::Depth => "depth",
            Quantity::Flow => "flow",
            Quantity::Volume => "volume",
        }
    }

    /// Capitalized name used in output file names (`MaxDepth`, `RelativeFlow`).
    pub fn label(self) -> &'static str {
        match self {
            Quantity::Depth => "Depth",
            Quantity::Flow => "Flow",
            Quantity::Volume => "Volume",
        }
    }

    /// Metric unit of the converted values.
    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Depth => "m",
            Quantity::Flow => "m^3/s",
            Quantity::Volume => "m^3",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Quantity> {
        Quantity::ALL.into_iter().find(|q| q.suffix() == suffix)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// Timestamp format of every persisted table.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Builds the combined-table column name for a node and quantity.
pub fn node_column(node_id: &str, quantity: Quantity) -> String {
    format!("{}_{}", node_id, quantity.suffix())
}

/// Splits a column name such as `J12-S_depth` into node identifier and
/// quantity. The node identifier is everything before the first `_`; the
/// remainder must be one of `suffixes`.
pub fn parse_node_column(column: &str, suffixes: &[Quantity]) -> Result<(String, Quantity)> {
    let parse_error = |reason: &str| PipelineError::ColumnParse {
        column: column.to_string(),
        reason: reason.to_string(),
    };
    let (node, suffix) = column
        .split_once('_')
        .ok_or_else(|| parse_error("no '_' separator"))?;
    if node.is_empty() {
        return Err(parse_error("empty node identifier"));
    }
    let quantity = suffixes
        .iter()
        .copied()
        .find(|q| q.suffix() == suffix)
        .ok_or_else(|| parse_error("unknown quantity suffix"))?;
    Ok((node.to_string(), quantity))
}

/// Checks that `node_id` survives a trip through its column names, i.e.
/// `parse_node_column(node_column(id, q))` gives back `id` for every
/// quantity. Identifiers containing `_` do not.
pub fn check_node_id(node_id: &str) -> Result<()> {
    for quantity in Quantity::ALL {
        let column = node_column(node_id, quantity);
        let (node, q) = parse_node_column(&column, &Quantity::ALL)?;
        if node != node_id || q != quantity {
            return Err(PipelineError::ColumnParse {
                column,
                reason: format!("node identifier '{}' is not recoverable from its column name", node_id),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sample types
// ---------------------------------------------------------------------------

/// One step's observation for one node, already in metric units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSample {
    pub depth_m: f64,
    pub inflow_cms: f64,
    pub volume_m3: f64,
}

impl NodeSample {
    /// Converts raw simulator values (ft, cfs, ft³) to metric.
    pub fn from_us_units(depth_ft: f64, inflow_cfs: f64, volume_cf: f64) -> Self {
        Self {
            depth_m: depth_ft * FT_TO_M,
            inflow_cms: inflow_cfs * CF_TO_CM,
            volume_m3: volume_cf * CF_TO_CM,
        }
    }

    pub fn get(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Depth => self.depth_m,
            Quantity::Flow => self.inflow_cms,
            Quantity::Volume => self.volume_m3,
        }
    }
}

/// Per-node samples of one scenario run, aligned on a shared timestamp axis.
///
/// `series[node][i]` is the observation taken at `timestamps[i]`. Node order
/// is the order the nodes were requested in, which the combined table keeps
/// for its columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeTimeSeries {
    pub timestamps: Vec<NaiveDateTime>,
    pub node_ids: Vec<String>,
    pub series: BTreeMap<String, Vec<NodeSample>>,
}

impl NodeTimeSeries {
    pub fn new(node_ids: &[String]) -> Self {
        Self {
            timestamps: Vec::new(),
            node_ids: node_ids.to_vec(),
            series: node_ids.iter().map(|n| (n.clone(), Vec::new())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn samples(&self, node_id: &str) -> Option<&[NodeSample]> {
        self.series.get(node_id).map(|s| s.as_slice())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that halt the pipeline. Every variant names the file, scenario or
/// node responsible so the operator can see what to fix.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input (model, metadata, recorded run, report) does not exist.
    #[error("File not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Config error in {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// A node observed in the results has no neighborhood/stream entry.
    #[error("No metadata for node: {0}")]
    MissingMetadata(String),
    #[error("Baseline scenario '{0}' not present in table")]
    MissingBaseline(String),
    #[error("Cannot parse node column '{column}': {reason}")]
    ColumnParse { column: String, reason: String },
    /// The engine failed or returned an incomplete run.
    #[error("Simulation failed for scenario '{scenario}': {message}")]
    SimulationFailed { scenario: String, message: String },
    /// The engine's binary results file is truncated or malformed.
    #[error("Malformed simulation output {}: {reason}", .path.display())]
    OutputFormat { path: PathBuf, reason: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Maps an I/O error to `MissingFile` when the path is absent, `Io` otherwise.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            PipelineError::MissingFile(path)
        } else {
            PipelineError::Io { path, source }
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PipelineError::Csv {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
