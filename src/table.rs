/// CSV persistence for the pipeline's tables.
///
/// - combined per-step table: `scenario,row,timestamp,<node>_<quantity>...`,
///   one block of rows per scenario; an empty cell means the node was not
///   observed in that scenario.
/// - absolute-max table: `node_name,<scenarios...>,node_id,neighborhood,historic_stream`
/// - relative table: `<non-baseline scenarios...>,node_name,node_id,neighborhood,historic_stream`
///
/// Values are written with Rust's shortest round-trip float formatting, so
/// a table read back holds exactly the values that were written. NaN and
/// infinite sentinels are written as `NaN` / `inf`.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::path::Path;

use crate::analyzer::{AnnotatedMaxTable, AnnotatedRow, RelativeChangeTable};
use crate::model::{self, NodeSample, NodeTimeSeries, PipelineError, Quantity, Result};
use crate::reducer::ScenarioRuns;

const COMBINED_KEYS: [&str; 3] = ["scenario", "row", "timestamp"];
const ANNOTATION_COLUMNS: [&str; 3] = ["node_id", "neighborhood", "historic_stream"];

fn format_value(value: f64) -> String {
    value.to_string()
}

fn parse_cell(column: &str, row: usize, cell: &str) -> Result<Option<f64>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse::<f64>().map(Some).map_err(|e| PipelineError::ColumnParse {
        column: column.to_string(),
        reason: format!("row {}: bad value '{}': {}", row, cell, e),
    })
}

fn finish(mut writer: csv::Writer<std::fs::File>, path: &Path) -> Result<()> {
    writer.flush().map_err(|e| PipelineError::from_io(path, e))
}

// ---------------------------------------------------------------------------
// Combined per-step table
// ---------------------------------------------------------------------------

/// Writes every scenario's series into one table. Node columns are the
/// union of all scenarios' nodes, in order of first appearance. Fails
/// before writing anything if a node identifier could not be read back.
pub fn write_combined_table(path: &Path, runs: &ScenarioRuns) -> Result<()> {
    let mut nodes: Vec<&str> = Vec::new();
    for (_, series) in runs.iter() {
        for node in &series.node_ids {
            if !nodes.contains(&node.as_str()) {
                nodes.push(node);
            }
        }
    }

    for node in &nodes {
        model::check_node_id(node)?;
    }

    let mut writer = csv::Writer::from_path(path).map_err(|e| PipelineError::csv(path, e))?;
    let mut header: Vec<String> = COMBINED_KEYS.iter().map(|k| k.to_string()).collect();
    for node in &nodes {
        header.extend(Quantity::ALL.iter().map(|&q| model::node_column(node, q)));
    }
    writer.write_record(&header).map_err(|e| PipelineError::csv(path, e))?;

    for (scenario, series) in runs.iter() {
        for (i, timestamp) in series.timestamps.iter().enumerate() {
            let mut record = vec![
                scenario.to_string(),
                i.to_string(),
                timestamp.format(model::TIMESTAMP_FORMAT).to_string(),
            ];
            for node in &nodes {
                let sample = series.samples(node).and_then(|s| s.get(i));
                for q in Quantity::ALL {
                    record.push(sample.map(|s| format_value(s.get(q))).unwrap_or_default());
                }
            }
            writer.write_record(&record).map_err(|e| PipelineError::csv(path, e))?;
        }
    }
    finish(writer, path)
}

/// Reads a combined table back into per-scenario series. A node belongs to
/// a scenario when any of its cells in the scenario's first row is filled;
/// empty cells of a present node read as NaN. Each scenario's rows must form
/// one contiguous block.
pub fn read_combined_table(path: &Path) -> Result<ScenarioRuns> {
    if !path.is_file() {
        return Err(PipelineError::MissingFile(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| PipelineError::csv(path, e))?;
    let headers = reader.headers().map_err(|e| PipelineError::csv(path, e))?.clone();

    for (i, key) in COMBINED_KEYS.iter().enumerate() {
        if headers.get(i) != Some(*key) {
            return Err(PipelineError::ColumnParse {
                column: headers.get(i).unwrap_or_default().to_string(),
                reason: format!("expected '{}' as column {}", key, i + 1),
            });
        }
    }

    let mut node_order: Vec<String> = Vec::new();
    let mut columns: HashMap<(String, Quantity), usize> = HashMap::new();
    for (i, name) in headers.iter().enumerate().skip(COMBINED_KEYS.len()) {
        let (node, quantity) = model::parse_node_column(name, &Quantity::ALL)?;
        if !node_order.contains(&node) {
            node_order.push(node.clone());
        }
        columns.insert((node, quantity), i);
    }

    let mut runs = ScenarioRuns::new();
    let mut current: Option<(String, NodeTimeSeries)> = None;

    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| PipelineError::csv(path, e))?;
        let row = line + 1;
        let scenario = record.get(0).unwrap_or_default();
        let stamp = record.get(2).unwrap_or_default();
        let timestamp = NaiveDateTime::parse_from_str(stamp, model::TIMESTAMP_FORMAT).map_err(|e| {
            PipelineError::ColumnParse {
                column: "timestamp".to_string(),
                reason: format!("row {}: bad timestamp '{}': {}", row, stamp, e),
            }
        })?;

        let cell = |node: &str, q: Quantity| -> Result<Option<f64>> {
            match columns.get(&(node.to_string(), q)) {
                Some(&col) => parse_cell(&headers[col], row, record.get(col).unwrap_or_default()),
                None => Ok(None),
            }
        };

        let starts_new = current.as_ref().map(|(name, _)| name != scenario).unwrap_or(true);
        if starts_new {
            if let Some((name, series)) = current.take() {
                runs.insert(&name, series);
            }
            if runs.get(scenario).is_some() {
                return Err(PipelineError::ColumnParse {
                    column: "scenario".to_string(),
                    reason: format!("row {}: rows for scenario '{}' are not contiguous", row, scenario),
                });
            }
            let mut present = Vec::new();
            for node in &node_order {
                let mut filled = false;
                for q in Quantity::ALL {
                    filled |= cell(node, q)?.is_some();
                }
                if filled {
                    present.push(node.clone());
                }
            }
            current = Some((scenario.to_string(), NodeTimeSeries::new(&present)));
        }

        if let Some((_, series)) = current.as_mut() {
            series.timestamps.push(timestamp);
            for node in series.node_ids.clone() {
                let sample = NodeSample {
                    depth_m: cell(&node, Quantity::Depth)?.unwrap_or(f64::NAN),
                    inflow_cms: cell(&node, Quantity::Flow)?.unwrap_or(f64::NAN),
                    volume_m3: cell(&node, Quantity::Volume)?.unwrap_or(f64::NAN),
                };
                if let Some(samples) = series.series.get_mut(&node) {
                    samples.push(sample);
                }
            }
        }
    }
    if let Some((name, series)) = current.take() {
        runs.insert(&name, series);
    }
    Ok(runs)
}

// ---------------------------------------------------------------------------
// Comparison tables
// ---------------------------------------------------------------------------

fn annotation_cells(row: &AnnotatedRow) -> [String; 3] {
    [
        row.node_id.clone(),
        row.neighborhood.clone(),
        row.historic_stream.clone(),
    ]
}

pub fn write_max_table(path: &Path, table: &AnnotatedMaxTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| PipelineError::csv(path, e))?;

    let mut header = vec!["node_name".to_string()];
    header.extend(table.scenarios.iter().cloned());
    header.extend(ANNOTATION_COLUMNS.iter().map(|c| c.to_string()));
    writer.write_record(&header).map_err(|e| PipelineError::csv(path, e))?;

    for row in &table.rows {
        let mut record = vec![row.node_name.clone()];
        record.extend(row.values.iter().map(|&v| format_value(v)));
        record.extend(annotation_cells(row));
        writer.write_record(&record).map_err(|e| PipelineError::csv(path, e))?;
    }
    finish(writer, path)
}

pub fn write_relative_table(path: &Path, table: &RelativeChangeTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| PipelineError::csv(path, e))?;

    let mut header: Vec<String> = table.scenarios.clone();
    header.push("node_name".to_string());
    header.extend(ANNOTATION_COLUMNS.iter().map(|c| c.to_string()));
    writer.write_record(&header).map_err(|e| PipelineError::csv(path, e))?;

    for row in &table.rows {
        let mut record: Vec<String> = row.values.iter().map(|&v| format_value(v)).collect();
        record.push(row.node_name.clone());
        record.extend(annotation_cells(row));
        writer.write_record(&record).map_err(|e| PipelineError::csv(path, e))?;
    }
    finish(writer, path)
}

/// Reloads a relative table written by `write_relative_table`.
pub fn read_relative_table(path: &Path) -> Result<RelativeChangeTable> {
    if !path.is_file() {
        return Err(PipelineError::MissingFile(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| PipelineError::csv(path, e))?;
    let headers = reader.headers().map_err(|e| PipelineError::csv(path, e))?.clone();

    let name_col = headers
        .iter()
        .position(|h| h == "node_name")
        .ok_or_else(|| PipelineError::ColumnParse {
            column: "node_name".to_string(),
            reason: format!("missing from {}", path.display()),
        })?;
    let trailing: Vec<&str> = headers.iter().skip(name_col + 1).collect();
    if trailing != ANNOTATION_COLUMNS {
        return Err(PipelineError::ColumnParse {
            column: trailing.join(","),
            reason: format!("expected {} after node_name", ANNOTATION_COLUMNS.join(",")),
        });
    }
    let scenarios: Vec<String> = headers.iter().take(name_col).map(String::from).collect();

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.map_err(|e| PipelineError::csv(path, e))?;
        let mut values = Vec::with_capacity(scenarios.len());
        for (col, scenario) in scenarios.iter().enumerate() {
            let value = parse_cell(scenario, line + 1, record.get(col).unwrap_or_default())?;
            values.push(value.unwrap_or(f64::NAN));
        }
        let field = |offset: usize| record.get(name_col + offset).unwrap_or_default().to_string();
        rows.push(AnnotatedRow {
            node_name: field(0),
            node_id: field(1),
            values,
            neighborhood: field(2),
            historic_stream: field(3),
        });
    }
    Ok(RelativeChangeTable { scenarios, rows })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
