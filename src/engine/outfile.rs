/// SWMM 5 binary results file reader.
///
/// Layout (all values little-endian, records are 4 bytes):
///
/// ```text
/// opening   magic, version, flow units, #subcatch, #nodes, #links, #pollutants
/// ids       (len, bytes) per object, subcatchments → nodes → links → pollutants
/// props     per object kind: count, codes, values
/// vars      per object kind + system: count, codes
///           start date (f64 days since 1899-12-30), report step (seconds)
/// results   per period: f64 date, then f32 values
/// epilogue  id pos, props pos, results pos, #periods, error code, magic
/// ```

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::{PipelineError, Result};

pub const MAGIC: i32 = 516_114_522;
const RECORD: usize = 4;
const DATE: usize = 8;
const OPENING: usize = 7 * RECORD;
const EPILOGUE: usize = 6 * RECORD;

/// Node result variable indices.
pub const NODE_DEPTH: usize = 0;
pub const NODE_HEAD: usize = 1;
pub const NODE_VOLUME: usize = 2;
pub const NODE_LATERAL_INFLOW: usize = 3;
pub const NODE_TOTAL_INFLOW: usize = 4;
pub const NODE_FLOODING: usize = 5;

// ---------------------------------------------------------------------------
// Flow units
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowUnits {
    Cfs,
    Gpm,
    Mgd,
    Cms,
    Lps,
    Mld,
}

impl FlowUnits {
    pub fn from_code(code: i32) -> Option<FlowUnits> {
        match code {
            0 => Some(FlowUnits::Cfs),
            1 => Some(FlowUnits::Gpm),
            2 => Some(FlowUnits::Mgd),
            3 => Some(FlowUnits::Cms),
            4 => Some(FlowUnits::Lps),
            5 => Some(FlowUnits::Mld),
            _ => None,
        }
    }

    /// Depth in feet and volume in ft³ go with the US flow units.
    pub fn is_us_customary(self) -> bool {
        matches!(self, FlowUnits::Cfs | FlowUnits::Gpm | FlowUnits::Mgd)
    }
}

// ---------------------------------------------------------------------------
// Date decoding
// ---------------------------------------------------------------------------

/// Converts a SWMM date (fractional days since 1899-12-30) to a timestamp,
/// rounded to the nearest second.
pub fn decode_swmm_date(days: f64) -> Option<NaiveDateTime> {
    if !days.is_finite() || days.abs() > 3.0e6 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let seconds = (days * 86_400.0).round() as i64;
    epoch.checked_add_signed(Duration::seconds(seconds))
}

// ---------------------------------------------------------------------------
// Byte cursor
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Cursor<'a> {
    fn at(data: &'a [u8], pos: usize, path: &'a Path) -> Self {
        Self { data, pos, path }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let data: &'a [u8] = self.data;
                let bytes = &data[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(format_error(
                self.path,
                format!("unexpected end of file reading {} bytes at offset {}", n, self.pos),
            )),
        }
    }

    fn i32(&mut self) -> Result<i32> {
        let bytes = self.take(RECORD)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a count that must be non-negative.
    fn count(&mut self, what: &str) -> Result<usize> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| format_error(self.path, format!("negative {} count {}", what, n)))
    }

    fn f64(&mut self) -> Result<f64> {
        let bytes = self.take(DATE)?;
        let mut buf = [0u8; DATE];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    fn skip_records(&mut self, n: usize) -> Result<()> {
        let len = n
            .checked_mul(RECORD)
            .ok_or_else(|| format_error(self.path, "record count overflow".to_string()))?;
        self.take(len).map(|_| ())
    }
}

fn format_error(path: &Path, reason: String) -> PipelineError {
    PipelineError::OutputFormat {
        path: path.to_path_buf(),
        reason,
    }
}

fn read_f32_at(data: &[u8], offset: usize) -> Option<f32> {
    let bytes = data.get(offset..offset + RECORD)?;
    Some(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_f64_at(data: &[u8], offset: usize) -> Option<f64> {
    let bytes = data.get(offset..offset + DATE)?;
    let mut buf = [0u8; DATE];
    buf.copy_from_slice(bytes);
    Some(f64::from_le_bytes(buf))
}

// ---------------------------------------------------------------------------
// Results file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Counts {
    subcatchments: usize,
    nodes: usize,
    links: usize,
    pollutants: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VariableCounts {
    subcatchment: usize,
    node: usize,
    link: usize,
    system: usize,
}

/// An opened, validated SWMM results file held in memory.
#[derive(Debug)]
pub struct SwmmOutput {
    path: PathBuf,
    data: Vec<u8>,
    pub version: i32,
    pub flow_units_code: i32,
    /// Engine error code from the epilogue; non-zero means the run failed.
    pub error_code: i32,
    pub start_date: f64,
    pub report_step_seconds: i32,
    pub periods: usize,
    counts: Counts,
    vars: VariableCounts,
    node_names: Vec<String>,
    results_pos: usize,
    bytes_per_period: usize,
}

impl SwmmOutput {
    pub fn open(path: &Path) -> Result<SwmmOutput> {
        let data = fs::read(path).map_err(|e| PipelineError::from_io(path, e))?;
        SwmmOutput::from_bytes(path, data)
    }

    pub fn from_bytes(path: &Path, data: Vec<u8>) -> Result<SwmmOutput> {
        if data.len() < OPENING + EPILOGUE {
            return Err(format_error(path, format!("file too short ({} bytes)", data.len())));
        }

        let mut head = Cursor::at(&data, 0, path);
        let magic_start = head.i32()?;
        let version = head.i32()?;
        let flow_units_code = head.i32()?;
        let counts = Counts {
            subcatchments: head.count("subcatchment")?,
            nodes: head.count("node")?,
            links: head.count("link")?,
            pollutants: head.count("pollutant")?,
        };

        let mut tail = Cursor::at(&data, data.len() - EPILOGUE, path);
        let ids_pos = tail.count("id offset")?;
        let props_pos = tail.count("property offset")?;
        let results_pos = tail.count("results offset")?;
        let periods = tail.count("period")?;
        let error_code = tail.i32()?;
        let magic_end = tail.i32()?;

        if magic_start != MAGIC || magic_end != MAGIC {
            return Err(format_error(
                path,
                format!("bad magic number ({} / {})", magic_start, magic_end),
            ));
        }

        let node_names = read_node_names(&data, ids_pos, counts, path)?;
        let vars = read_variable_counts(&data, props_pos, counts, path)?;

        if results_pos < DATE + RECORD {
            return Err(format_error(path, format!("results offset {} too small", results_pos)));
        }
        let mut timing = Cursor::at(&data, results_pos - DATE - RECORD, path);
        let start_date = timing.f64()?;
        let report_step_seconds = timing.i32()?;

        let values_per_period = counts.subcatchments * vars.subcatchment
            + counts.nodes * vars.node
            + counts.links * vars.link
            + vars.system;
        let bytes_per_period = DATE + values_per_period * RECORD;

        let results_end = periods
            .checked_mul(bytes_per_period)
            .and_then(|n| n.checked_add(results_pos));
        match results_end {
            Some(end) if end <= data.len() - EPILOGUE => {}
            _ => {
                return Err(format_error(
                    path,
                    format!("{} periods do not fit in the results section", periods),
                ));
            }
        }

        Ok(SwmmOutput {
            path: path.to_path_buf(),
            data,
            version,
            flow_units_code,
            error_code,
            start_date,
            report_step_seconds,
            periods,
            counts,
            vars,
            node_names,
            results_pos,
            bytes_per_period,
        })
    }

    pub fn flow_units(&self) -> Option<FlowUnits> {
        FlowUnits::from_code(self.flow_units_code)
    }

    pub fn node_names(&self) -> &[String] {
        &self.node_names
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.node_names.iter().position(|n| n == name)
    }

    fn period_offset(&self, period: usize) -> Result<usize> {
        if period >= self.periods {
            return Err(format_error(
                &self.path,
                format!("period {} out of range ({} periods)", period, self.periods),
            ));
        }
        Ok(self.results_pos + period * self.bytes_per_period)
    }

    /// Timestamp at the end of reporting period `period`.
    pub fn period_time(&self, period: usize) -> Result<NaiveDateTime> {
        let offset = self.period_offset(period)?;
        let days = read_f64_at(&self.data, offset)
            .ok_or_else(|| format_error(&self.path, format!("missing date for period {}", period)))?;
        decode_swmm_date(days)
            .ok_or_else(|| format_error(&self.path, format!("invalid date {} in period {}", days, period)))
    }

    /// One node result variable for one period.
    pub fn node_value(&self, period: usize, node: usize, var: usize) -> Result<f32> {
        if node >= self.counts.nodes || var >= self.vars.node {
            return Err(format_error(
                &self.path,
                format!("node {} / variable {} out of range", node, var),
            ));
        }
        let index = self.counts.subcatchments * self.vars.subcatchment + node * self.vars.node + var;
        let offset = self.period_offset(period)? + DATE + index * RECORD;
        read_f32_at(&self.data, offset)
            .ok_or_else(|| format_error(&self.path, format!("value at offset {} past end", offset)))
    }
}

fn read_node_names(data: &[u8], ids_pos: usize, counts: Counts, path: &Path) -> Result<Vec<String>> {
    let mut cursor = Cursor::at(data, ids_pos, path);
    let total = counts.subcatchments + counts.nodes + counts.links + counts.pollutants;
    let mut nodes = Vec::with_capacity(counts.nodes);
    for i in 0..total {
        let len = cursor.count("name length")?;
        let bytes = cursor.take(len)?;
        if i >= counts.subcatchments && i < counts.subcatchments + counts.nodes {
            nodes.push(String::from_utf8_lossy(bytes).into_owned());
        }
    }
    Ok(nodes)
}

/// Skips the object property tables and reads how many result variables
/// each object kind reports.
fn read_variable_counts(data: &[u8], props_pos: usize, counts: Counts, path: &Path) -> Result<VariableCounts> {
    let mut cursor = Cursor::at(data, props_pos, path);
    for objects in [counts.subcatchments, counts.nodes, counts.links] {
        let n = cursor.count("property")?;
        cursor.skip_records(n)?;
        let values = n
            .checked_mul(objects)
            .ok_or_else(|| format_error(path, "property table overflow".to_string()))?;
        cursor.skip_records(values)?;
    }

    let mut read_vars = |what: &str| -> Result<usize> {
        let n = cursor.count(what)?;
        cursor.skip_records(n)?;
        Ok(n)
    };
    Ok(VariableCounts {
        subcatchment: read_vars("subcatchment variable")?,
        node: read_vars("node variable")?,
        link: read_vars("link variable")?,
        system: read_vars("system variable")?,
    })
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Builds a small results file: one subcatchment, the given nodes, one link,
/// no pollutants, six node variables per node.
#[cfg(test)]
pub(crate) fn build_test_output(
    nodes: &[&str],
    periods: &[(f64, Vec<[f32; 6]>)],
    error_code: i32,
) -> Vec<u8> {
    const SUB_VARS: i32 = 8;
    const NODE_VARS: i32 = 6;
    const LINK_VARS: i32 = 5;
    const SYS_VARS: i32 = 15;

    let mut out: Vec<u8> = Vec::new();
    let push_i32 = |out: &mut Vec<u8>, v: i32| out.extend_from_slice(&v.to_le_bytes());
    let push_f32 = |out: &mut Vec<u8>, v: f32| out.extend_from_slice(&v.to_le_bytes());

    for v in [MAGIC, 51_000, 0, 1, nodes.len() as i32, 1, 0] {
        push_i32(&mut out, v);
    }

    let ids_pos = out.len() as i32;
    let mut names: Vec<&str> = vec!["S1"];
    names.extend_from_slice(nodes);
    names.push("C1");
    for name in names {
        push_i32(&mut out, name.len() as i32);
        out.extend_from_slice(name.as_bytes());
    }

    let props_pos = out.len() as i32;
    push_i32(&mut out, 1);
    push_i32(&mut out, 1);
    push_f32(&mut out, 2.5);
    push_i32(&mut out, 3);
    for code in [0, 2, 3] {
        push_i32(&mut out, code);
    }
    for _ in nodes {
        for v in [0.0, 10.0, 8.0] {
            push_f32(&mut out, v);
        }
    }
    push_i32(&mut out, 5);
    for code in [0, 4, 5, 6, 7] {
        push_i32(&mut out, code);
    }
    for v in [1.0, 0.0, 0.0, 2.0, 100.0] {
        push_f32(&mut out, v);
    }

    for n in [SUB_VARS, NODE_VARS, LINK_VARS, SYS_VARS] {
        push_i32(&mut out, n);
        for code in 0..n {
            push_i32(&mut out, code);
        }
    }
    let start = periods.first().map(|p| p.0).unwrap_or(45_104.0);
    out.extend_from_slice(&start.to_le_bytes());
    push_i32(&mut out, 300);

    let results_pos = out.len() as i32;
    for (date, values) in periods {
        out.extend_from_slice(&date.to_le_bytes());
        for _ in 0..SUB_VARS {
            push_f32(&mut out, -1.0);
        }
        for node_values in values {
            for v in node_values {
                push_f32(&mut out, *v);
            }
        }
        for _ in 0..(LINK_VARS + SYS_VARS) {
            push_f32(&mut out, -2.0);
        }
    }

    for v in [ids_pos, props_pos, results_pos, periods.len() as i32, error_code, MAGIC] {
        push_i32(&mut out, v);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
