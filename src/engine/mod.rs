/// Simulation engine boundary.
///
/// The hydrology engine is a black box: given a model input, a reporting
/// step and the nodes of interest, it returns one raw observation per node
/// per step, in the simulator's own (US customary) units. Unit conversion
/// and validation of the returned run belong to the collector.
///
/// Submodules:
/// - `outfile`: reader for the SWMM 5 binary results file.
/// - `swmm`: runs the `swmm5` command line engine.
/// - `replay`: replays recorded runs for development without the engine.

pub mod outfile;
pub mod replay;
pub mod swmm;

use chrono::NaiveDateTime;
use std::path::Path;

use crate::config::EngineConfig;
use crate::model::Result;

/// Node state as reported by the engine: depth (ft), total inflow (cfs),
/// stored + ponded volume (ft³).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawNodeState {
    pub depth_ft: f64,
    pub total_inflow_cfs: f64,
    pub volume_cf: f64,
}

/// One reporting step. `nodes[i]` belongs to `RunRequest::node_ids[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStep {
    pub timestamp: NaiveDateTime,
    pub nodes: Vec<RawNodeState>,
}

/// What to simulate and what to observe.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    pub scenario: &'a str,
    pub inp: &'a Path,
    pub step_seconds: u32,
    pub node_ids: &'a [String],
}

pub trait SimulationEngine {
    /// Runs the model to completion. Any failure is fatal for the scenario;
    /// implementations must not return a partial run as success.
    fn run(&mut self, request: &RunRequest<'_>) -> Result<Vec<RawStep>>;
}

/// Builds the engine selected in the experiment configuration.
pub fn engine_from_config(config: &EngineConfig) -> Box<dyn SimulationEngine> {
    match config {
        EngineConfig::Swmm5 { binary } => Box::new(swmm::Swmm5Engine::new(binary.clone())),
        EngineConfig::Replay { dir } => Box::new(replay::ReplayEngine::new(dir.clone())),
    }
}
