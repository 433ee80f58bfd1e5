/// Experiment orchestration: Collector → Reducer → Analyzer.
///
/// Scenarios run one after another; each runs to completion (or fails the
/// whole experiment) before the next starts. Every output lands in
/// `config.output_dir`, ending with a JSON manifest of what was produced.

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analyzer::{self, QuantityAnalysis};
use crate::collector;
use crate::config::ExperimentConfig;
use crate::encoding;
use crate::engine::{RunRequest, SimulationEngine};
use crate::inp;
use crate::logging::{self, Stage};
use crate::metadata::{self, NodeMetadata};
use crate::model::{self, PipelineError, Quantity, Result};
use crate::reducer::{self, ScenarioRuns};
use crate::table;

/// Record of one experiment run, written as `<storm>_<label>_manifest.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub generated_at: String,
    pub storm: String,
    pub model_label: String,
    pub baseline: String,
    pub simulated: bool,
    pub scenarios: Vec<String>,
    pub nodes_compared: usize,
    pub dropped_nodes: Vec<String>,
    pub combined_table: PathBuf,
    pub outputs: Vec<PathBuf>,
}

fn prepare_output_dir(config: &ExperimentConfig) -> Result<()> {
    fs::create_dir_all(&config.output_dir).map_err(|e| PipelineError::from_io(&config.output_dir, e))
}

/// Cleans the `.rpt` sitting next to each scenario's model, if any.
fn clean_reports(config: &ExperimentConfig) -> Result<()> {
    for scenario in &config.scenarios {
        let rpt = scenario.inp.with_extension("rpt");
        if rpt.is_file() {
            logging::info(
                Stage::System,
                Some(&scenario.name),
                &format!("Cleaning report file: {}", rpt.display()),
            );
            encoding::clean_report_file(&rpt, true)?;
        }
    }
    Ok(())
}

/// Runs every configured scenario and collects its street-node series.
fn collect_all(config: &ExperimentConfig, engine: &mut dyn SimulationEngine) -> Result<ScenarioRuns> {
    let source = config.node_source_scenario()?;
    let all_nodes = inp::list_nodes_in_file(&source.inp)?;
    let street_nodes = collector::select_street_nodes(&all_nodes, &config.nodes);
    if street_nodes.is_empty() {
        return Err(PipelineError::InvalidConfig(format!(
            "no nodes containing '{}' in {}",
            config.nodes.marker,
            source.inp.display()
        )));
    }
    for node in &street_nodes {
        model::check_node_id(node)?;
    }
    logging::info(
        Stage::Collector,
        None,
        &format!(
            "{} street nodes of {} in {}",
            street_nodes.len(),
            all_nodes.len(),
            source.inp.display()
        ),
    );

    let storm_series = config.storm_series()?;
    let mut runs = ScenarioRuns::new();
    for scenario in &config.scenarios {
        logging::info(
            Stage::Collector,
            Some(&scenario.name),
            &format!("Running scenario under storm {}", config.storm),
        );
        let input = inp::write_scenario_input(
            &scenario.name,
            &config.storm,
            storm_series,
            &scenario.inp,
            config.step_seconds,
        )?;
        let request = RunRequest {
            scenario: &scenario.name,
            inp: input.path(),
            step_seconds: config.step_seconds,
            node_ids: &street_nodes,
        };
        let series = collector::collect_node_series(engine, &request)?;
        runs.insert(&scenario.name, series);
    }
    Ok(runs)
}

/// Reduces the runs, analyzes depth, flow and volume, and writes the manifest.
fn analyze_runs(
    config: &ExperimentConfig,
    runs: &ScenarioRuns,
    metadata: &NodeMetadata,
    simulated: bool,
) -> Result<RunManifest> {
    if runs.get(&config.baseline).is_none() {
        return Err(PipelineError::MissingBaseline(config.baseline.clone()));
    }

    let maxima = reducer::reduce(runs);
    let mut analyses: Vec<QuantityAnalysis> = Vec::with_capacity(Quantity::ALL.len());
    for quantity in Quantity::ALL {
        analyses.push(analyzer::analyze_quantity(&maxima, quantity, metadata, config)?);
    }

    let (complete, dropped) = maxima.partition_nodes();
    let manifest = RunManifest {
        generated_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        storm: config.storm.clone(),
        model_label: config.model_label.clone(),
        baseline: config.baseline.clone(),
        simulated,
        scenarios: runs.names(),
        nodes_compared: complete.len(),
        dropped_nodes: dropped,
        combined_table: config.combined_table_path(),
        outputs: analyses
            .iter()
            .flat_map(|a| [a.max_path.clone(), a.relative_path.clone()])
            .collect(),
    };
    write_manifest(&config.manifest_path(), &manifest)?;
    Ok(manifest)
}

pub fn write_manifest(path: &Path, manifest: &RunManifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, json).map_err(|e| PipelineError::from_io(path, e))?;
    logging::info(Stage::System, None, &format!("Wrote manifest {}", path.display()));
    Ok(())
}

/// Full experiment: simulate every scenario, persist the combined per-step
/// table, then analyze.
pub fn run_experiment(config: &ExperimentConfig, engine: &mut dyn SimulationEngine) -> Result<RunManifest> {
    let metadata = metadata::load_metadata(&config.metadata)?;
    logging::info(
        Stage::Config,
        None,
        &format!("Loaded metadata for {} nodes", metadata.len()),
    );
    prepare_output_dir(config)?;
    clean_reports(config)?;

    let runs = collect_all(config, engine)?;
    let combined = config.combined_table_path();
    table::write_combined_table(&combined, &runs)?;
    logging::info(
        Stage::Collector,
        None,
        &format!("Wrote combined table {}", combined.display()),
    );

    analyze_runs(config, &runs, &metadata, true)
}

/// Analysis only: re-reads the combined table of an earlier run.
pub fn analyze_recorded(config: &ExperimentConfig) -> Result<RunManifest> {
    let metadata = metadata::load_metadata(&config.metadata)?;
    prepare_output_dir(config)?;

    let combined = config.combined_table_path();
    let runs = table::read_combined_table(&combined)?;
    logging::info(
        Stage::Reducer,
        None,
        &format!("Read {} scenarios from {}", runs.len(), combined.display()),
    );

    analyze_runs(config, &runs, &metadata, false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
