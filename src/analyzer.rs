/// Baseline-relative analysis of per-node maxima.
///
/// For one quantity: annotate the max table with node metadata, subtract
/// the baseline column from every other scenario, and summarize each
/// scenario by its peak, its mean, and its largest change against the
/// baseline. Summaries are printed; both tables are written to disk.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::ExperimentConfig;
use crate::logging::{self, Stage};
use crate::metadata::NodeMetadata;
use crate::model::{self, PipelineError, Quantity, Result};
use crate::reducer::{self, MaxTable, ScenarioNodeTable};
use crate::table;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// One node row of an annotated table. `values` line up with the owning
/// table's `scenarios`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedRow {
    /// Column name the value came from, e.g. `J12-S_depth`.
    pub node_name: String,
    pub node_id: String,
    pub values: Vec<f64>,
    pub neighborhood: String,
    pub historic_stream: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedMaxTable {
    pub quantity: Quantity,
    pub scenarios: Vec<String>,
    pub rows: Vec<AnnotatedRow>,
}

/// Per-node change against the baseline for every non-baseline scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeChangeTable {
    pub scenarios: Vec<String>,
    pub rows: Vec<AnnotatedRow>,
}

fn column_of(scenarios: &[String], scenario: &str) -> Option<usize> {
    scenarios.iter().position(|s| s == scenario)
}

impl AnnotatedMaxTable {
    pub fn column(&self, scenario: &str) -> Option<usize> {
        column_of(&self.scenarios, scenario)
    }
}

impl RelativeChangeTable {
    pub fn column(&self, scenario: &str) -> Option<usize> {
        column_of(&self.scenarios, scenario)
    }
}

/// Attaches node name and location to every row. A node without metadata
/// is fatal: its results could not be attributed to a neighborhood.
pub fn annotate(max_table: &MaxTable, metadata: &NodeMetadata) -> Result<AnnotatedMaxTable> {
    let mut rows = Vec::with_capacity(max_table.rows.len());
    for (node, values) in &max_table.rows {
        let location = metadata.lookup(node)?;
        rows.push(AnnotatedRow {
            node_name: model::node_column(node, max_table.quantity),
            node_id: node.clone(),
            values: values.clone(),
            neighborhood: location.neighborhood.clone(),
            historic_stream: location.historic_stream.clone(),
        });
    }
    Ok(AnnotatedMaxTable {
        quantity: max_table.quantity,
        scenarios: max_table.scenarios.clone(),
        rows,
    })
}

/// `relative[n, s] = max[n, s] - max[n, baseline]` for every scenario `s`
/// other than the baseline. Column order follows the max table.
pub fn relative_to_baseline(table: &AnnotatedMaxTable, baseline: &str) -> Result<RelativeChangeTable> {
    let base_col = table
        .column(baseline)
        .ok_or_else(|| PipelineError::MissingBaseline(baseline.to_string()))?;

    let kept: Vec<usize> = (0..table.scenarios.len()).filter(|&i| i != base_col).collect();
    let scenarios = kept.iter().map(|&i| table.scenarios[i].clone()).collect();

    let rows = table
        .rows
        .iter()
        .map(|row| AnnotatedRow {
            values: kept.iter().map(|&i| row.values[i] - row.values[base_col]).collect(),
            ..row.clone()
        })
        .collect();

    Ok(RelativeChangeTable { scenarios, rows })
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// `change / baseline × 100`, or `f64::INFINITY` when the baseline is not
/// a positive number.
pub fn percent_change(change: f64, baseline: f64) -> f64 {
    if baseline > 0.0 {
        change / baseline * 100.0
    } else {
        f64::INFINITY
    }
}

/// Index of the first row maximizing `key`; NaN keys are skipped.
fn first_max_by<F>(rows: &[AnnotatedRow], key: F) -> Option<usize>
where
    F: Fn(&AnnotatedRow) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, row) in rows.iter().enumerate() {
        let k = key(row);
        if k.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if k <= b => {}
            _ => best = Some((i, k)),
        }
    }
    best.map(|(i, _)| i)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Peak and mean of one scenario's absolute maxima.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioStats {
    pub scenario: String,
    /// `(node_name, value)` of the highest node; `None` if no value is a number.
    pub peak: Option<(String, f64)>,
    pub mean: f64,
}

pub fn scenario_stats(table: &AnnotatedMaxTable) -> Vec<ScenarioStats> {
    table
        .scenarios
        .iter()
        .enumerate()
        .map(|(col, scenario)| ScenarioStats {
            scenario: scenario.clone(),
            peak: first_max_by(&table.rows, |r| r.values[col])
                .map(|i| (table.rows[i].node_name.clone(), table.rows[i].values[col])),
            mean: mean(table.rows.iter().map(|r| r.values[col])),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelativeStats {
    pub scenario: String,
    pub mean_change: f64,
}

pub fn relative_stats(table: &RelativeChangeTable) -> Vec<RelativeStats> {
    table
        .scenarios
        .iter()
        .enumerate()
        .map(|(col, scenario)| RelativeStats {
            scenario: scenario.clone(),
            mean_change: mean(table.rows.iter().map(|r| r.values[col])),
        })
        .collect()
}

/// One node's change against the baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakChange {
    pub node_name: String,
    pub change: f64,
    pub baseline: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeakChangeReport {
    pub scenario: String,
    /// Largest change by magnitude, sign kept.
    pub peak_absolute: PeakChange,
    /// Largest signed change.
    pub peak_increase: PeakChange,
}

/// Finds the largest changes of `scenario` and relates them to the baseline
/// value at the same node. Ties go to the first row. `Ok(None)` when the
/// scenario has no numeric change at all.
pub fn peak_change(
    relative: &RelativeChangeTable,
    absolute: &AnnotatedMaxTable,
    baseline: &str,
    scenario: &str,
) -> Result<Option<PeakChangeReport>> {
    let base_col = absolute
        .column(baseline)
        .ok_or_else(|| PipelineError::MissingBaseline(baseline.to_string()))?;
    let col = relative.column(scenario).ok_or_else(|| {
        PipelineError::InvalidConfig(format!("scenario '{}' not in relative table", scenario))
    })?;

    let base_by_node: HashMap<&str, f64> = absolute
        .rows
        .iter()
        .map(|r| (r.node_name.as_str(), r.values[base_col]))
        .collect();

    let describe = |i: usize| {
        let row = &relative.rows[i];
        let change = row.values[col];
        let base = base_by_node.get(row.node_name.as_str()).copied().unwrap_or(f64::NAN);
        PeakChange {
            node_name: row.node_name.clone(),
            change,
            baseline: base,
            percent: percent_change(change, base),
        }
    };

    let increase = first_max_by(&relative.rows, |r| r.values[col]);
    let absolute_peak = first_max_by(&relative.rows, |r| r.values[col].abs());
    match (absolute_peak, increase) {
        (Some(a), Some(i)) => Ok(Some(PeakChangeReport {
            scenario: scenario.to_string(),
            peak_absolute: describe(a),
            peak_increase: describe(i),
        })),
        _ => {
            logging::warn(
                Stage::Analyzer,
                Some(scenario),
                "no numeric change against the baseline; peak change skipped",
            );
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Per-quantity analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct QuantityAnalysis {
    pub quantity: Quantity,
    pub absolute: AnnotatedMaxTable,
    pub relative: RelativeChangeTable,
    pub stats: Vec<ScenarioStats>,
    pub relative_means: Vec<RelativeStats>,
    pub peaks: Vec<PeakChangeReport>,
    pub dropped_nodes: Vec<String>,
    pub max_path: PathBuf,
    pub relative_path: PathBuf,
}

/// Reduces, annotates and compares one quantity, writes its max and
/// relative tables, and prints the summary.
pub fn analyze_quantity(
    maxima: &ScenarioNodeTable,
    quantity: Quantity,
    metadata: &NodeMetadata,
    config: &ExperimentConfig,
) -> Result<QuantityAnalysis> {
    let pivot = reducer::max_table(maxima, quantity);
    let absolute = annotate(&pivot, metadata)?;
    let relative = relative_to_baseline(&absolute, &config.baseline)?;

    if let Some(base_col) = absolute.column(&config.baseline) {
        let degenerate = absolute
            .rows
            .iter()
            .filter(|r| r.values[base_col].is_nan() || r.values[base_col] <= 0.0)
            .count();
        if degenerate > 0 {
            logging::warn(
                Stage::Analyzer,
                None,
                &format!(
                    "{} nodes have a non-positive baseline {}; their percent change is infinite",
                    degenerate, quantity
                ),
            );
        }
    }

    let stats = scenario_stats(&absolute);
    let relative_means = relative_stats(&relative);
    let mut peaks = Vec::new();
    for scenario in &relative.scenarios {
        if let Some(report) = peak_change(&relative, &absolute, &config.baseline, scenario)? {
            peaks.push(report);
        }
    }

    let max_path = config.max_table_path(quantity);
    let relative_path = config.relative_table_path(quantity);
    table::write_max_table(&max_path, &absolute)?;
    table::write_relative_table(&relative_path, &relative)?;
    logging::info(
        Stage::Analyzer,
        None,
        &format!(
            "Wrote {} rows to {} and {}",
            absolute.rows.len(),
            max_path.display(),
            relative_path.display()
        ),
    );

    let analysis = QuantityAnalysis {
        quantity,
        absolute,
        relative,
        stats,
        relative_means,
        peaks,
        dropped_nodes: pivot.dropped_nodes,
        max_path,
        relative_path,
    };
    print_summary(&analysis, &config.baseline);
    Ok(analysis)
}

/// Prints peaks, averages and baseline-relative peaks to stdout.
pub fn print_summary(analysis: &QuantityAnalysis, baseline: &str) {
    let label = analysis.quantity.label();
    let unit = analysis.quantity.unit();

    println!("\nPeak {} by Scenario:", label);
    for stat in &analysis.stats {
        match &stat.peak {
            Some((node, value)) => println!(
                "Scenario: {}, Node: {}, Peak {}: {:.3} {}",
                stat.scenario, node, label, value, unit
            ),
            None => println!("Scenario: {}, no data", stat.scenario),
        }
    }

    println!("\nAverage {} by Scenario:", label);
    for stat in &analysis.stats {
        println!("Scenario: {}, Average {}: {:.3} {}", stat.scenario, label, stat.mean, unit);
    }

    println!("\nAverage Relative {} Change by Scenario:", label);
    for stat in &analysis.relative_means {
        println!("Scenario: {}, Average Change: {:.3} {}", stat.scenario, stat.mean_change, unit);
    }

    println!("\nPeak Relative {} Change by Scenario:", label);
    for report in &analysis.peaks {
        let line = |title: &str, p: &PeakChange| {
            format!(
                "  {}: {:.3} {} at {} ({}: {:.3} {}, Change: {:.1}%)",
                title, p.change, unit, p.node_name, baseline, p.baseline, unit, p.percent
            )
        };
        println!("Scenario: {}", report.scenario);
        println!("{}", line("Peak Absolute Change", &report.peak_absolute));
        println!("{}", line("Peak Increase", &report.peak_increase));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn metadata(nodes: &[&str]) -> NodeMetadata {
        let mut m = NodeMetadata::default();
        for node in nodes {
            m.insert(node, &format!("{} hood", node), "Harford Run");
        }
        m
    }

    fn max_table(scenarios: &[&str], rows: &[(&str, Vec<f64>)]) -> MaxTable {
        MaxTable {
            quantity: Quantity::Depth,
            scenarios: scenarios.iter().map(|s| s.to_string()).collect(),
            rows: rows.iter().cloned().map(|(n, v)| (n.to_string(), v)).collect::<BTreeMap<_, _>>(),
            dropped_nodes: Vec::new(),
        }
    }

    fn two_node_study() -> AnnotatedMaxTable {
        let pivot = max_table(&["Base", "V"], &[("A", vec![1.0, 1.2]), ("B", vec![2.0, 1.8])]);
        annotate(&pivot, &metadata(&["A", "B"])).unwrap()
    }

    #[test]
    fn test_annotate_names_rows_after_columns() {
        let annotated = two_node_study();
        assert_eq!(annotated.rows[0].node_name, "A_depth");
        assert_eq!(annotated.rows[0].node_id, "A");
        assert_eq!(annotated.rows[1].neighborhood, "B hood");
        assert_eq!(annotated.rows[1].historic_stream, "Harford Run");
    }

    #[test]
    fn test_annotate_without_metadata_is_fatal() {
        let pivot = max_table(&["Base"], &[("A", vec![1.0]), ("Z", vec![1.0])]);
        let err = annotate(&pivot, &metadata(&["A"])).unwrap_err();
        assert!(matches!(err, PipelineError::MissingMetadata(ref n) if n == "Z"), "got {:?}", err);
    }

    #[test]
    fn test_relative_subtracts_baseline_and_drops_its_column() {
        let relative = relative_to_baseline(&two_node_study(), "Base").unwrap();
        assert_eq!(relative.scenarios, ["V"], "baseline is never a relative column");
        assert!((relative.rows[0].values[0] - 0.2).abs() < 1e-12);
        assert!((relative.rows[1].values[0] + 0.2).abs() < 1e-12);
        assert_eq!(relative.rows[1].node_name, "B_depth");
    }

    #[test]
    fn test_relative_preserves_non_baseline_order() {
        let pivot = max_table(&["V", "Base", "I"], &[("A", vec![3.0, 1.0, 0.5])]);
        let annotated = annotate(&pivot, &metadata(&["A"])).unwrap();
        let relative = relative_to_baseline(&annotated, "Base").unwrap();
        assert_eq!(relative.scenarios, ["V", "I"]);
        assert_eq!(relative.rows[0].values, vec![2.0, -0.5]);
    }

    #[test]
    fn test_missing_baseline_column_is_fatal() {
        let err = relative_to_baseline(&two_node_study(), "Control").unwrap_err();
        assert!(matches!(err, PipelineError::MissingBaseline(_)));
    }

    #[test]
    fn test_peak_change_ties_resolve_to_first_row() {
        let absolute = two_node_study();
        let relative = relative_to_baseline(&absolute, "Base").unwrap();
        let report = peak_change(&relative, &absolute, "Base", "V").unwrap().unwrap();

        assert_eq!(report.peak_increase.node_name, "A_depth");
        assert!((report.peak_increase.change - 0.2).abs() < 1e-12);
        assert_eq!(report.peak_increase.baseline, 1.0);
        assert!((report.peak_increase.percent - 20.0).abs() < 1e-9);

        assert_eq!(report.peak_absolute.node_name, "A_depth", "|0.2| == |-0.2| resolves to the first row");
        assert!((report.peak_absolute.change - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_peak_absolute_keeps_sign_of_largest_decrease() {
        let pivot = max_table(&["Base", "V"], &[("A", vec![1.0, 1.1]), ("B", vec![2.0, 1.5])]);
        let absolute = annotate(&pivot, &metadata(&["A", "B"])).unwrap();
        let relative = relative_to_baseline(&absolute, "Base").unwrap();
        let report = peak_change(&relative, &absolute, "Base", "V").unwrap().unwrap();

        assert_eq!(report.peak_absolute.node_name, "B_depth");
        assert_eq!(report.peak_absolute.change, -0.5);
        assert_eq!(report.peak_absolute.percent, -25.0);
        assert_eq!(report.peak_increase.node_name, "A_depth");
    }

    #[test]
    fn test_zero_baseline_gives_infinite_percent() {
        assert_eq!(percent_change(0.3, 0.0), f64::INFINITY);
        assert_eq!(percent_change(0.3, -1.0), f64::INFINITY);
        assert_eq!(percent_change(0.3, f64::NAN), f64::INFINITY);
        assert_eq!(percent_change(0.5, 2.0), 25.0);

        let pivot = max_table(&["Base", "V"], &[("A", vec![0.0, 0.4])]);
        let absolute = annotate(&pivot, &metadata(&["A"])).unwrap();
        let relative = relative_to_baseline(&absolute, "Base").unwrap();
        let report = peak_change(&relative, &absolute, "Base", "V").unwrap().unwrap();
        assert!(report.peak_increase.percent.is_infinite(), "never a silent NaN");
    }

    #[test]
    fn test_nan_cells_are_ignored_and_all_nan_gives_no_report() {
        let pivot = max_table(&["Base", "V", "I"], &[("A", vec![1.0, f64::NAN, f64::NAN]), ("B", vec![1.0, 1.5, f64::NAN])]);
        let absolute = annotate(&pivot, &metadata(&["A", "B"])).unwrap();
        let relative = relative_to_baseline(&absolute, "Base").unwrap();

        let v = peak_change(&relative, &absolute, "Base", "V").unwrap().unwrap();
        assert_eq!(v.peak_increase.node_name, "B_depth");
        assert!(peak_change(&relative, &absolute, "Base", "I").unwrap().is_none());
    }

    #[test]
    fn test_scenario_and_relative_stats() {
        let absolute = two_node_study();
        let stats = scenario_stats(&absolute);
        assert_eq!(stats[0].scenario, "Base");
        assert_eq!(stats[0].peak, Some(("B_depth".to_string(), 2.0)));
        assert!((stats[0].mean - 1.5).abs() < 1e-12);
        assert!((stats[1].mean - 1.5).abs() < 1e-12);

        let relative = relative_to_baseline(&absolute, "Base").unwrap();
        let means = relative_stats(&relative);
        assert_eq!(means.len(), 1);
        assert!(means[0].mean_change.abs() < 1e-12);
    }
}
