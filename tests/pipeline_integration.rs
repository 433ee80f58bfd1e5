/// Integration tests for the full scenario comparison pipeline
///
/// Tests verify:
/// 1. Scenario inputs are rewritten (storm, report step) before each run
/// 2. Every scenario is collected, reduced and compared against the baseline
/// 3. Max, relative and combined tables plus the manifest land in output_dir
/// 4. Analysis-only runs reproduce the same tables from the combined table
/// 5. Engine failures and missing metadata stop the experiment
///
/// A scripted in-memory engine stands in for SWMM; no simulator is needed.

use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::Path;

use swmm_compare::config::{self, ExperimentConfig};
use swmm_compare::engine::{RawNodeState, RawStep, RunRequest, SimulationEngine};
use swmm_compare::model::{FT_TO_M, PipelineError, Result};
use swmm_compare::pipeline;
use swmm_compare::table;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const MODEL: &str = "\
[OPTIONS]
FLOW_UNITS           CFS
REPORT_STEP          00:15:00

[RAINGAGES]
RG1              INTENSITY 0:05     1.0      TIMESERIES 6/27/23_fullstorm_x2depth

[JUNCTIONS]
J1               10.2       8
J1-S             18.2       0.5
J2-S             18.0       0.5
J509-S           20.0       0.5

[OUTFALLS]
OF1              0          FREE

[STORAGE]
J3-S             14.0       1.0
";

const METADATA: &str = "\
street_node_id,neighborhood,historic_stream
J1-S,Fells Point,Harris Creek
J2-S,Canton,Harris Creek
J3-S,Highlandtown,Moores Run
";

/// Peak depth (ft) per street node in the baseline; scenarios scale it.
const BASE_PEAKS_FT: [f64; 3] = [1.0, 2.0, 0.5];

fn scenario_factor(scenario: &str) -> f64 {
    match scenario {
        "V" => 1.5,
        "I" => 0.75,
        _ => 1.0,
    }
}

/// Scripted engine: three steps rising to the node's scaled peak at step 2.
struct ScriptedEngine {
    runs: Vec<String>,
    inputs: Vec<String>,
    fail_on: Option<String>,
}

impl ScriptedEngine {
    fn new() -> Self {
        ScriptedEngine { runs: Vec::new(), inputs: Vec::new(), fail_on: None }
    }
}

fn step_time(step: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 6, 27)
        .unwrap()
        .and_hms_opt(0, 5 * step, 0)
        .unwrap()
}

impl SimulationEngine for ScriptedEngine {
    fn run(&mut self, request: &RunRequest<'_>) -> Result<Vec<RawStep>> {
        self.runs.push(request.scenario.to_string());
        self.inputs.push(fs::read_to_string(request.inp).expect("scenario input readable during run"));
        if self.fail_on.as_deref() == Some(request.scenario) {
            return Err(PipelineError::SimulationFailed {
                scenario: request.scenario.to_string(),
                message: "ERROR 191: simulation start date comes after ending date".to_string(),
            });
        }

        let factor = scenario_factor(request.scenario);
        let shape = [0.25, 1.0, 0.5];
        Ok((0..3)
            .map(|k| RawStep {
                timestamp: step_time(k as u32 + 1),
                nodes: request
                    .node_ids
                    .iter()
                    .enumerate()
                    .map(|(i, _)| {
                        let depth = BASE_PEAKS_FT[i] * factor * shape[k];
                        RawNodeState { depth_ft: depth, total_inflow_cfs: depth * 4.0, volume_cf: depth * 100.0 }
                    })
                    .collect(),
            })
            .collect())
    }
}

fn setup_study(dir: &Path) -> ExperimentConfig {
    fs::create_dir_all(dir.join("inputdata")).unwrap();
    for name in ["base", "vacants", "inlets"] {
        fs::write(dir.join("inputdata").join(format!("{}.inp", name)), MODEL).unwrap();
    }
    fs::write(dir.join("inputdata/Node_Neighborhoods.csv"), METADATA).unwrap();
    fs::write(
        dir.join("scenarios.toml"),
        r#"
storm = "6_27_23"
model_label = "V23"
metadata = "inputdata/Node_Neighborhoods.csv"

[storms]
"6_27_23" = "6/27/2023"

[[scenarios]]
name = "Base"
inp = "inputdata/base.inp"

[[scenarios]]
name = "V"
inp = "inputdata/vacants.inp"

[[scenarios]]
name = "I"
inp = "inputdata/inlets.inp"
"#,
    )
    .unwrap();
    config::load_config(&dir.join("scenarios.toml")).expect("study config loads")
}

// ---------------------------------------------------------------------------
// Full Experiment
// ---------------------------------------------------------------------------

#[test]
fn test_full_experiment_writes_all_tables() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup_study(dir.path());
    let mut engine = ScriptedEngine::new();

    let manifest = pipeline::run_experiment(&config, &mut engine).expect("experiment succeeds");

    assert_eq!(engine.runs, ["Base", "V", "I"], "scenarios run sequentially in config order");
    assert_eq!(manifest.scenarios, ["Base", "V", "I"]);
    assert_eq!(manifest.nodes_compared, 3, "J509-S is excluded, J1 is not a street node");
    assert!(manifest.dropped_nodes.is_empty());
    assert_eq!(manifest.outputs.len(), 6);
    for path in &manifest.outputs {
        assert!(path.is_file(), "missing output {}", path.display());
    }
    assert!(config.combined_table_path().is_file());

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(config.manifest_path()).unwrap()).unwrap();
    assert_eq!(json["nodes_compared"], 3);
    assert_eq!(json["baseline"], "Base");
}

#[test]
fn test_scenario_inputs_carry_storm_and_report_step() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup_study(dir.path());
    let mut engine = ScriptedEngine::new();

    pipeline::run_experiment(&config, &mut engine).unwrap();

    for input in &engine.inputs {
        assert!(input.contains("RG1 INTENSITY 0:05 1.0 TIMESERIES 6/27/2023"));
        assert!(input.contains("REPORT_STEP 00:05:00"));
        assert!(input.contains("J509-S           20.0       0.5"), "other lines untouched");
    }
    let original = fs::read_to_string(dir.path().join("inputdata/base.inp")).unwrap();
    assert_eq!(original, MODEL, "source models are never modified");
}

#[test]
fn test_relative_depth_matches_scenario_minus_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup_study(dir.path());
    pipeline::run_experiment(&config, &mut ScriptedEngine::new()).unwrap();

    let relative = table::read_relative_table(
        &config.relative_table_path(swmm_compare::model::Quantity::Depth),
    )
    .unwrap();

    assert_eq!(relative.scenarios, ["V", "I"], "baseline is not a relative column");
    assert_eq!(relative.rows.len(), 3);

    let names: Vec<&str> = relative.rows.iter().map(|r| r.node_name.as_str()).collect();
    assert_eq!(names, ["J1-S_depth", "J2-S_depth", "J3-S_depth"]);

    for (row, peak_ft) in relative.rows.iter().zip(BASE_PEAKS_FT) {
        let base_m = peak_ft * FT_TO_M;
        assert!((row.values[0] - (base_m * 1.5 - base_m)).abs() < 1e-9, "V at {}", row.node_name);
        assert!((row.values[1] - (base_m * 0.75 - base_m)).abs() < 1e-9, "I at {}", row.node_name);
    }
    assert_eq!(relative.rows[1].neighborhood, "Canton");
    assert_eq!(relative.rows[2].historic_stream, "Moores Run");
}

// ---------------------------------------------------------------------------
// Analysis-only Runs
// ---------------------------------------------------------------------------

#[test]
fn test_analysis_only_run_reproduces_tables() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup_study(dir.path());
    let manifest = pipeline::run_experiment(&config, &mut ScriptedEngine::new()).unwrap();

    let first: Vec<String> = manifest
        .outputs
        .iter()
        .map(|p| fs::read_to_string(p).unwrap())
        .collect();

    let recorded = pipeline::analyze_recorded(&config).expect("analysis-only run succeeds");
    assert!(!recorded.simulated);
    assert_eq!(recorded.outputs, manifest.outputs);

    for (path, before) in manifest.outputs.iter().zip(&first) {
        let after = fs::read_to_string(path).unwrap();
        assert_eq!(&after, before, "{} changed between runs", path.display());
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn test_engine_failure_stops_the_experiment() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup_study(dir.path());
    let mut engine = ScriptedEngine::new();
    engine.fail_on = Some("V".to_string());

    let err = pipeline::run_experiment(&config, &mut engine).unwrap_err();
    assert!(matches!(err, PipelineError::SimulationFailed { ref scenario, .. } if scenario == "V"));
    assert_eq!(engine.runs, ["Base", "V"], "no scenario runs after a failure");
    assert!(!config.combined_table_path().exists());
}

#[test]
fn test_node_without_metadata_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup_study(dir.path());
    fs::write(
        dir.path().join("inputdata/Node_Neighborhoods.csv"),
        "street_node_id,neighborhood,historic_stream\nJ1-S,Fells Point,Harris Creek\n",
    )
    .unwrap();

    let err = pipeline::run_experiment(&config, &mut ScriptedEngine::new()).unwrap_err();
    assert!(matches!(err, PipelineError::MissingMetadata(ref node) if node == "J2-S"), "got {:?}", err);
}
