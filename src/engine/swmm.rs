/// SWMM 5 command line engine.
///
/// Runs `swmm5 <inp> <rpt> <out>` inside a scratch directory and reads node
/// results back from the binary output file. The reporting step is taken
/// from the input file, which the pipeline rewrites to the sampling step
/// before handing it over.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::encoding;
use crate::engine::outfile::{self, SwmmOutput};
use crate::engine::{RawNodeState, RawStep, RunRequest, SimulationEngine};
use crate::logging::{self, Stage};
use crate::model::{PipelineError, Result};

pub struct Swmm5Engine {
    binary: PathBuf,
}

impl Swmm5Engine {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

fn failed(scenario: &str, message: String) -> PipelineError {
    PipelineError::SimulationFailed {
        scenario: scenario.to_string(),
        message,
    }
}

/// Builds a failure message, appending the report's `ERROR` lines when the
/// engine got far enough to write any.
fn failure_with_report(scenario: &str, headline: String, rpt: &Path) -> PipelineError {
    let details = encoding::read_report_text(rpt)
        .map(|text| encoding::report_errors(&text))
        .unwrap_or_default();
    if details.is_empty() {
        failed(scenario, headline)
    } else {
        failed(scenario, format!("{} ({})", headline, details.join("; ")))
    }
}

impl SimulationEngine for Swmm5Engine {
    fn run(&mut self, request: &RunRequest<'_>) -> Result<Vec<RawStep>> {
        let workdir = tempfile::Builder::new()
            .prefix("swmm_run_")
            .tempdir()
            .map_err(|e| PipelineError::from_io(std::env::temp_dir(), e))?;
        let rpt = workdir.path().join("run.rpt");
        let out = workdir.path().join("run.out");

        logging::info(
            Stage::Engine,
            Some(request.scenario),
            &format!("Running {} on {}", self.binary.display(), request.inp.display()),
        );

        let result = Command::new(&self.binary)
            .arg(request.inp)
            .arg(&rpt)
            .arg(&out)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                failed(
                    request.scenario,
                    format!("could not start {}: {}", self.binary.display(), e),
                )
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            let mut headline = format!("{} exited with {}", self.binary.display(), result.status);
            if !stderr.is_empty() {
                headline = format!("{}: {}", headline, stderr);
            }
            return Err(failure_with_report(request.scenario, headline, &rpt));
        }
        if !out.is_file() {
            return Err(failure_with_report(
                request.scenario,
                "engine wrote no results file".to_string(),
                &rpt,
            ));
        }

        let output = SwmmOutput::open(&out)?;
        if output.error_code != 0 {
            return Err(failure_with_report(
                request.scenario,
                format!("engine reported error code {}", output.error_code),
                &rpt,
            ));
        }
        steps_from_output(&output, request)
    }
}

/// Extracts depth, total inflow and volume for the requested nodes at every
/// reporting period.
pub fn steps_from_output(output: &SwmmOutput, request: &RunRequest<'_>) -> Result<Vec<RawStep>> {
    match output.flow_units() {
        Some(units) if units.is_us_customary() => {}
        other => logging::warn(
            Stage::Engine,
            Some(request.scenario),
            &format!("model flow units {:?} are not US customary; ft/cfs conversion still applied", other),
        ),
    }
    if output.report_step_seconds != request.step_seconds as i32 {
        return Err(failed(
            request.scenario,
            format!(
                "report step is {} s, requested {} s",
                output.report_step_seconds, request.step_seconds
            ),
        ));
    }
    if output.periods == 0 {
        return Err(failed(request.scenario, "no reporting periods in results".to_string()));
    }

    let indices = request
        .node_ids
        .iter()
        .map(|id| {
            output
                .node_index(id)
                .ok_or_else(|| failed(request.scenario, format!("node '{}' not in results", id)))
        })
        .collect::<Result<Vec<usize>>>()?;

    let mut steps = Vec::with_capacity(output.periods);
    for period in 0..output.periods {
        let timestamp = output.period_time(period)?;
        let mut nodes = Vec::with_capacity(indices.len());
        for &node in &indices {
            nodes.push(RawNodeState {
                depth_ft: output.node_value(period, node, outfile::NODE_DEPTH)? as f64,
                total_inflow_cfs: output.node_value(period, node, outfile::NODE_TOTAL_INFLOW)? as f64,
                volume_cf: output.node_value(period, node, outfile::NODE_VOLUME)? as f64,
            });
        }
        steps.push(RawStep { timestamp, nodes });
    }
    Ok(steps)
}
