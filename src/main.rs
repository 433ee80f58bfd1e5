/// swmm_compare: run a stormwater model under several scenario variants and
/// compare per-node flood peaks against a baseline.
///
/// Usage: `swmm_compare [CONFIG]` (default `scenarios.toml`).

use std::path::PathBuf;
use std::process;

use swmm_compare::config;
use swmm_compare::engine;
use swmm_compare::logging::{self, LogLevel, Stage};
use swmm_compare::pipeline;

const DEFAULT_CONFIG: &str = "scenarios.toml";

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    logging::init_logger(LogLevel::Info, None, false);

    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            logging::error(Stage::Config, None, &e.to_string());
            process::exit(1);
        }
    };

    if let Some(log_file) = &config.log_file {
        logging::init_logger(LogLevel::Info, log_file.to_str(), false);
    }
    logging::info(
        Stage::System,
        None,
        &format!(
            "Experiment {} with {} scenarios (baseline {})",
            config.file_stem(),
            config.scenarios.len(),
            config.baseline
        ),
    );

    let result = if config.simulate {
        let mut engine = engine::engine_from_config(&config.engine);
        pipeline::run_experiment(&config, engine.as_mut())
    } else {
        pipeline::analyze_recorded(&config)
    };

    match result {
        Ok(manifest) => {
            logging::info(
                Stage::System,
                None,
                &format!(
                    "Done: {} nodes compared across {} scenarios, {} output tables",
                    manifest.nodes_compared,
                    manifest.scenarios.len(),
                    manifest.outputs.len()
                ),
            );
        }
        Err(e) => {
            logging::error(Stage::System, None, &e.to_string());
            process::exit(1);
        }
    }
}
