/// Experiment configuration: which model variants to run, which storm to
/// drive them with, and where inputs and outputs live.
///
/// Loaded once from a TOML file and passed explicitly into the pipeline
/// entry point. Nothing here is mutated after `load_config` returns.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::{PipelineError, Quantity, Result};

pub const DEFAULT_STEP_SECONDS: u32 = 300;

// ---------------------------------------------------------------------------
// Configuration types
// ---------------------------------------------------------------------------

/// One model variant in the experiment matrix.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    /// Path to the scenario's SWMM input (`.inp`) file.
    pub inp: PathBuf,
}

/// Which nodes are observed: street nodes by naming convention, minus
/// known-bad identifiers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeSelection {
    #[serde(default = "default_marker")]
    pub marker: String,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

fn default_marker() -> String {
    "-S".to_string()
}

fn default_exclude() -> Vec<String> {
    // Patterson Park node, irrelevant to the street-flooding study.
    vec!["J509-S".to_string()]
}

impl Default for NodeSelection {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            exclude: default_exclude(),
        }
    }
}

/// Simulation backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineConfig {
    /// Run the SWMM 5 command line engine.
    Swmm5 {
        #[serde(default = "default_binary")]
        binary: PathBuf,
    },
    /// Replay recorded runs from `<dir>/<scenario>.csv`.
    Replay { dir: PathBuf },
}

fn default_binary() -> PathBuf {
    PathBuf::from("swmm5")
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::Swmm5 {
            binary: default_binary(),
        }
    }
}

fn default_baseline() -> String {
    "Base".to_string()
}

fn default_step() -> u32 {
    DEFAULT_STEP_SECONDS
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputdata")
}

fn default_true() -> bool {
    true
}

/// The full experiment: scenario matrix, storm selection and file layout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_baseline")]
    pub baseline: String,
    /// Key into `storms` selecting the rainfall event to simulate.
    pub storm: String,
    /// Model version tag embedded in output file names, e.g. `V23`.
    #[serde(default)]
    pub model_label: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// CSV of `street_node_id,neighborhood,historic_stream`. The
    /// `Node_Neighborhoods.xlsx` workbook is read from its first sheet
    /// exported as CSV with those headers.
    pub metadata: PathBuf,
    /// Scenario whose model defines the observed node set; defaults to the baseline.
    #[serde(default)]
    pub node_source: Option<String>,
    #[serde(default = "default_step")]
    pub step_seconds: u32,
    /// When false, skip simulation and analyze the recorded combined table.
    #[serde(default = "default_true")]
    pub simulate: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub nodes: NodeSelection,
    /// Storm key → name of the rainfall time series inside the model.
    pub storms: BTreeMap<String, String>,
    pub scenarios: Vec<ScenarioConfig>,
}

impl ExperimentConfig {
    /// Rainfall time series name for the selected storm.
    pub fn storm_series(&self) -> Result<&str> {
        self.storms
            .get(&self.storm)
            .map(|s| s.as_str())
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!("storm '{}' not defined in [storms]", self.storm))
            })
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioConfig> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    pub fn node_source_scenario(&self) -> Result<&ScenarioConfig> {
        let name = self.node_source.as_deref().unwrap_or(&self.baseline);
        self.scenario(name).ok_or_else(|| {
            PipelineError::InvalidConfig(format!("node source scenario '{}' not configured", name))
        })
    }

    /// `<storm>_<label>` or just `<storm>` when no label is set.
    pub fn file_stem(&self) -> String {
        if self.model_label.is_empty() {
            self.storm.clone()
        } else {
            format!("{}_{}", self.storm, self.model_label)
        }
    }

    /// Combined raw per-step table for all scenarios.
    pub fn combined_table_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_sim{}_AllNodes.csv", self.storm, self.model_label))
    }

    /// Absolute-max table for one quantity, e.g. `6_27_23_V23_AllNodes_MaxDepth.csv`.
    pub fn max_table_path(&self, quantity: Quantity) -> PathBuf {
        self.output_dir
            .join(format!("{}_AllNodes_Max{}.csv", self.file_stem(), quantity.label()))
    }

    pub fn relative_table_path(&self, quantity: Quantity) -> PathBuf {
        self.output_dir
            .join(format!("{}_AllNodes_Relative{}.csv", self.file_stem(), quantity.label()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_manifest.json", self.file_stem()))
    }

    /// Resolves relative paths against `base` (the config file's directory).
    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.output_dir);
        resolve(&mut self.metadata);
        if let Some(log) = self.log_file.as_mut() {
            resolve(log);
        }
        if let EngineConfig::Replay { dir } = &mut self.engine {
            resolve(dir);
        }
        for scenario in &mut self.scenarios {
            resolve(&mut scenario.inp);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scenarios.is_empty() {
            return Err(PipelineError::InvalidConfig("no [[scenarios]] defined".to_string()));
        }
        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            if scenario.name.trim().is_empty() {
                return Err(PipelineError::InvalidConfig("scenario with empty name".to_string()));
            }
            if !seen.insert(scenario.name.as_str()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "duplicate scenario name '{}'",
                    scenario.name
                )));
            }
        }
        if self.scenario(&self.baseline).is_none() {
            return Err(PipelineError::MissingBaseline(self.baseline.clone()));
        }
        self.node_source_scenario()?;
        self.storm_series()?;
        if self.step_seconds == 0 {
            return Err(PipelineError::InvalidConfig("step_seconds must be positive".to_string()));
        }
        if self.nodes.marker.is_empty() {
            return Err(PipelineError::InvalidConfig("node marker must not be empty".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parses and validates a configuration from TOML text. Paths are left as
/// written.
pub fn parse_config(text: &str, origin: &Path) -> Result<ExperimentConfig> {
    let config: ExperimentConfig = toml::from_str(text).map_err(|source| PipelineError::Config {
        path: origin.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

/// Loads the configuration file; relative paths inside it are taken
/// relative to the file's own directory.
pub fn load_config(path: &Path) -> Result<ExperimentConfig> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::from_io(path, e))?;
    let mut config = parse_config(&text, path)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    config.resolve_paths(base);
    Ok(config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
