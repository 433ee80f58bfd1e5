/// Development mode: replay recorded engine output.
///
/// When the SWMM engine is unavailable, use this engine to feed previously
/// recorded runs through the pipeline. Each scenario reads
/// `<dir>/<scenario>.csv` with a `timestamp` column followed by
/// `<node>_depth`, `<node>_flow` and `<node>_volume` columns in simulator
/// units (ft, cfs, ft³). Empty cells replay as NaN.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::engine::{RawNodeState, RawStep, RunRequest, SimulationEngine};
use crate::logging::{self, Stage};
use crate::model::{self, PipelineError, Quantity, Result};

pub struct ReplayEngine {
    dir: PathBuf,
}

impl ReplayEngine {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn recording_path(&self, scenario: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", scenario))
    }
}

fn failed(scenario: &str, message: String) -> PipelineError {
    PipelineError::SimulationFailed {
        scenario: scenario.to_string(),
        message,
    }
}

fn parse_value(cell: &str) -> std::result::Result<f64, std::num::ParseFloatError> {
    let cell = cell.trim();
    if cell.is_empty() { Ok(f64::NAN) } else { cell.parse() }
}

impl SimulationEngine for ReplayEngine {
    fn run(&mut self, request: &RunRequest<'_>) -> Result<Vec<RawStep>> {
        let path = self.recording_path(request.scenario);
        if !path.is_file() {
            return Err(PipelineError::MissingFile(path));
        }
        logging::info(
            Stage::Engine,
            Some(request.scenario),
            &format!("Replaying recorded run {}", path.display()),
        );

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|e| PipelineError::csv(&path, e))?;
        let headers = reader.headers().map_err(|e| PipelineError::csv(&path, e))?.clone();

        match headers.get(0) {
            Some("timestamp") => {}
            _ => {
                return Err(failed(
                    request.scenario,
                    format!("{} must start with a 'timestamp' column", path.display()),
                ));
            }
        }

        let mut columns: HashMap<(String, Quantity), usize> = HashMap::new();
        for (i, name) in headers.iter().enumerate().skip(1) {
            let key = model::parse_node_column(name, &Quantity::ALL)?;
            columns.insert(key, i);
        }

        let mut wanted = Vec::with_capacity(request.node_ids.len());
        for node in request.node_ids {
            let lookup = |q: Quantity| {
                columns.get(&(node.clone(), q)).copied().ok_or_else(|| {
                    failed(
                        request.scenario,
                        format!("recording has no column {}", model::node_column(node, q)),
                    )
                })
            };
            wanted.push([lookup(Quantity::Depth)?, lookup(Quantity::Flow)?, lookup(Quantity::Volume)?]);
        }

        let mut steps = Vec::new();
        for (row, result) in reader.records().enumerate() {
            let record = result.map_err(|e| PipelineError::csv(&path, e))?;
            let bad_row = |what: String| failed(request.scenario, format!("row {}: {}", row + 1, what));

            let stamp = record.get(0).unwrap_or_default();
            let timestamp = NaiveDateTime::parse_from_str(stamp, model::TIMESTAMP_FORMAT)
                .map_err(|e| bad_row(format!("bad timestamp '{}': {}", stamp, e)))?;

            let mut nodes = Vec::with_capacity(wanted.len());
            for cols in &wanted {
                let mut values = [0.0; 3];
                for (slot, &col) in values.iter_mut().zip(cols) {
                    let cell = record.get(col).unwrap_or_default();
                    *slot = parse_value(cell).map_err(|e| bad_row(format!("bad value '{}': {}", cell, e)))?;
                }
                nodes.push(RawNodeState {
                    depth_ft: values[0],
                    total_inflow_cfs: values[1],
                    volume_cf: values[2],
                });
            }
            steps.push(RawStep { timestamp, nodes });
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_recording(dir: &Path, scenario: &str, text: &str) {
        std::fs::write(dir.join(format!("{}.csv", scenario)), text).unwrap();
    }

    fn request<'a>(scenario: &'a str, nodes: &'a [String]) -> RunRequest<'a> {
        RunRequest {
            scenario,
            inp: Path::new("unused.inp"),
            step_seconds: 300,
            node_ids: nodes,
        }
    }

    #[test]
    fn test_replay_returns_requested_nodes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_recording(
            dir.path(),
            "V&I",
            "timestamp,J12-S_depth,J12-S_flow,J12-S_volume,J40-S_depth,J40-S_flow,J40-S_volume\n\
             2023-06-27 00:05:00,0.5,1.5,12,0.25,0.5,3\n\
             2023-06-27 00:10:00,0.75,,20,0.1,0.2,1\n",
        );
        let mut engine = ReplayEngine::new(dir.path().to_path_buf());
        let nodes = vec!["J40-S".to_string(), "J12-S".to_string()];

        let steps = engine.run(&request("V&I", &nodes)).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(
            steps[0].nodes[0],
            RawNodeState { depth_ft: 0.25, total_inflow_cfs: 0.5, volume_cf: 3.0 }
        );
        assert_eq!(steps[0].nodes[1].depth_ft, 0.5);
        assert!(steps[1].nodes[1].total_inflow_cfs.is_nan(), "empty cell replays as NaN");
        assert_eq!(steps[1].timestamp.format(model::TIMESTAMP_FORMAT).to_string(), "2023-06-27 00:10:00");
    }

    #[test]
    fn test_missing_recording_is_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ReplayEngine::new(dir.path().to_path_buf());
        let nodes = vec!["J12-S".to_string()];
        let err = engine.run(&request("Base", &nodes)).unwrap_err();
        assert!(matches!(err, PipelineError::MissingFile(_)));
    }

    #[test]
    fn test_recording_without_requested_node_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_recording(
            dir.path(),
            "Base",
            "timestamp,J12-S_depth,J12-S_flow,J12-S_volume\n2023-06-27 00:05:00,1,1,1\n",
        );
        let mut engine = ReplayEngine::new(dir.path().to_path_buf());
        let nodes = vec!["J40-S".to_string()];
        let err = engine.run(&request("Base", &nodes)).unwrap_err();
        assert!(err.to_string().contains("J40-S_depth"), "got {}", err);
    }

    #[test]
    fn test_bad_timestamp_names_the_row() {
        let dir = tempfile::tempdir().unwrap();
        write_recording(
            dir.path(),
            "Base",
            "timestamp,J12-S_depth,J12-S_flow,J12-S_volume\n6/27/2023 0:05,1,1,1\n",
        );
        let mut engine = ReplayEngine::new(dir.path().to_path_buf());
        let nodes = vec!["J12-S".to_string()];
        let err = engine.run(&request("Base", &nodes)).unwrap_err();
        assert!(err.to_string().contains("row 1"), "got {}", err);
    }
}
