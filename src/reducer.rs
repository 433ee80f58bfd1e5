/// Multi-scenario reduction
///
/// Merges every scenario's node series into one (scenario, node) table of
/// run maxima, then pivots it per quantity into node rows × scenario
/// columns. Both tables iterate in a fixed order: nodes lexicographically,
/// scenarios in run order.

use std::collections::{BTreeMap, BTreeSet};

use crate::logging::{self, Stage};
use crate::model::{NodeSample, NodeTimeSeries, Quantity};

// ---------------------------------------------------------------------------
// Scenario runs
// ---------------------------------------------------------------------------

/// Scenario name → collected series, in the order the scenarios were run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioRuns {
    runs: Vec<(String, NodeTimeSeries)>,
}

impl ScenarioRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a run. A repeated scenario name replaces the earlier run in place.
    pub fn insert(&mut self, scenario: &str, series: NodeTimeSeries) {
        match self.runs.iter_mut().find(|(name, _)| name == scenario) {
            Some(slot) => slot.1 = series,
            None => self.runs.push((scenario.to_string(), series)),
        }
    }

    pub fn get(&self, scenario: &str) -> Option<&NodeTimeSeries> {
        self.runs
            .iter()
            .find(|(name, _)| name == scenario)
            .map(|(_, series)| series)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NodeTimeSeries)> {
        self.runs.iter().map(|(name, series)| (name.as_str(), series))
    }

    pub fn names(&self) -> Vec<String> {
        self.runs.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Reduction
// ---------------------------------------------------------------------------

/// Run maxima of one node in one scenario.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeMaxima {
    pub depth: f64,
    pub flow: f64,
    pub volume: f64,
}

impl NodeMaxima {
    pub fn get(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Depth => self.depth,
            Quantity::Flow => self.flow,
            Quantity::Volume => self.volume,
        }
    }
}

/// NaN-skipping maximum; NaN when no sample is a number.
fn series_max(samples: &[NodeSample], quantity: Quantity) -> f64 {
    samples
        .iter()
        .map(|s| s.get(quantity))
        .fold(f64::NAN, f64::max)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioNodeTable {
    /// Scenario names in run order.
    pub scenarios: Vec<String>,
    /// (scenario, node) → maxima.
    pub entries: BTreeMap<(String, String), NodeMaxima>,
}

impl ScenarioNodeTable {
    pub fn get(&self, scenario: &str, node: &str) -> Option<&NodeMaxima> {
        self.entries.get(&(scenario.to_string(), node.to_string()))
    }

    /// Every node seen in any scenario, lexicographic.
    pub fn nodes(&self) -> BTreeSet<&str> {
        self.entries.keys().map(|(_, node)| node.as_str()).collect()
    }

    /// Splits the node set into nodes present in every scenario and nodes
    /// missing from at least one.
    pub fn partition_nodes(&self) -> (Vec<String>, Vec<String>) {
        let mut complete = Vec::new();
        let mut dropped = Vec::new();
        for node in self.nodes() {
            if self.scenarios.iter().all(|s| self.get(s, node).is_some()) {
                complete.push(node.to_string());
            } else {
                dropped.push(node.to_string());
            }
        }
        (complete, dropped)
    }
}

/// Reduces every (scenario, node) series to its run maxima.
///
/// Nodes that are not present in every scenario stay in the table but are
/// reported here, once, as they will be left out of every comparison.
pub fn reduce(runs: &ScenarioRuns) -> ScenarioNodeTable {
    let mut table = ScenarioNodeTable {
        scenarios: runs.names(),
        entries: BTreeMap::new(),
    };

    for (scenario, series) in runs.iter() {
        for (node, samples) in &series.series {
            let maxima = NodeMaxima {
                depth: series_max(samples, Quantity::Depth),
                flow: series_max(samples, Quantity::Flow),
                volume: series_max(samples, Quantity::Volume),
            };
            table.entries.insert((scenario.to_string(), node.clone()), maxima);
        }
    }

    let (complete, dropped) = table.partition_nodes();
    for node in &dropped {
        let missing: Vec<&str> = table
            .scenarios
            .iter()
            .filter(|s| table.get(s, node).is_none())
            .map(|s| s.as_str())
            .collect();
        logging::warn(
            Stage::Reducer,
            None,
            &format!("node {} missing from {}; excluded from comparison", node, missing.join(", ")),
        );
    }
    logging::log_run_summary(table.scenarios.len(), complete.len(), dropped.len());

    table
}

// ---------------------------------------------------------------------------
// Per-quantity pivot
// ---------------------------------------------------------------------------

/// Node rows × scenario columns for one quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxTable {
    pub quantity: Quantity,
    pub scenarios: Vec<String>,
    /// node → one value per entry of `scenarios`.
    pub rows: BTreeMap<String, Vec<f64>>,
    /// Nodes left out because at least one scenario lacks them.
    pub dropped_nodes: Vec<String>,
}

impl MaxTable {
    pub fn column(&self, scenario: &str) -> Option<usize> {
        self.scenarios.iter().position(|s| s == scenario)
    }
}

pub fn max_table(table: &ScenarioNodeTable, quantity: Quantity) -> MaxTable {
    let (complete, dropped_nodes) = table.partition_nodes();
    let mut rows = BTreeMap::new();
    for node in complete {
        let values = table
            .scenarios
            .iter()
            .filter_map(|s| table.get(s, &node))
            .map(|m| m.get(quantity))
            .collect();
        rows.insert(node, values);
    }
    MaxTable {
        quantity,
        scenarios: table.scenarios.clone(),
        rows,
        dropped_nodes,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
