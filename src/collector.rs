/// Node time-series collection for one scenario run.
///
/// Drives the engine once, checks the run is complete, and converts every
/// observation from simulator units to metric. A run that fails, returns no
/// steps, or returns the wrong number of nodes is rejected as a whole: the
/// reducer assumes exactly one complete series per scenario.

use crate::config::NodeSelection;
use crate::engine::{RunRequest, SimulationEngine};
use crate::logging::{self, Stage};
use crate::model::{NodeSample, NodeTimeSeries, PipelineError, Result};

// ---------------------------------------------------------------------------
// Node selection
// ---------------------------------------------------------------------------

/// Keeps street (above-ground storage) nodes and drops excluded identifiers.
/// Model order is preserved.
pub fn select_street_nodes(all_nodes: &[String], policy: &NodeSelection) -> Vec<String> {
    all_nodes
        .iter()
        .filter(|id| id.contains(policy.marker.as_str()))
        .filter(|id| !policy.exclude.iter().any(|ex| ex == *id))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Runs one scenario and returns its per-node series in metric units.
pub fn collect_node_series(
    engine: &mut dyn SimulationEngine,
    request: &RunRequest<'_>,
) -> Result<NodeTimeSeries> {
    let steps = match engine.run(request) {
        Ok(steps) => steps,
        Err(e) => {
            logging::log_scenario_failure(request.scenario, "simulation", &e);
            return Err(e);
        }
    };

    if steps.is_empty() {
        return Err(PipelineError::SimulationFailed {
            scenario: request.scenario.to_string(),
            message: "engine returned no steps".to_string(),
        });
    }

    let mut series = NodeTimeSeries::new(request.node_ids);
    for (i, step) in steps.into_iter().enumerate() {
        if step.nodes.len() != request.node_ids.len() {
            return Err(PipelineError::SimulationFailed {
                scenario: request.scenario.to_string(),
                message: format!(
                    "step {} has {} nodes, expected {}",
                    i,
                    step.nodes.len(),
                    request.node_ids.len()
                ),
            });
        }
        series.timestamps.push(step.timestamp);
        for (node_id, raw) in request.node_ids.iter().zip(&step.nodes) {
            let sample = NodeSample::from_us_units(raw.depth_ft, raw.total_inflow_cfs, raw.volume_cf);
            if let Some(samples) = series.series.get_mut(node_id) {
                samples.push(sample);
            }
        }
    }

    logging::info(
        Stage::Collector,
        Some(request.scenario),
        &format!(
            "Collected {} steps for {} nodes",
            series.len(),
            request.node_ids.len()
        ),
    );
    Ok(series)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
