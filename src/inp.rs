/// SWMM input (`.inp`) file handling: section rewrites and node listing.
///
/// The input format is line oriented. A section starts at a `[NAME]` header
/// and runs until the next line whose trimmed content starts with `[`.
/// Lines starting with `;` are comments. Only data lines inside the target
/// section are touched; everything else is copied byte for byte.

use std::fs;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::logging::{self, Stage};
use crate::model::{PipelineError, Result};

/// Node-bearing sections, in the order SWMM writes them.
pub const NODE_SECTIONS: [&str; 4] = ["JUNCTIONS", "OUTFALLS", "DIVIDERS", "STORAGE"];

// ---------------------------------------------------------------------------
// Section scanning
// ---------------------------------------------------------------------------

/// Returns the section name if `line` is a section header, e.g. `[RAINGAGES]`.
fn section_header(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix('[')?;
    let end = rest.find(']')?;
    Some(rest[..end].trim())
}

fn is_data_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with(';')
}

/// Splits off the line terminator so rewritten lines keep `\n` or `\r\n`.
fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Applies `edit` to the whitespace-split tokens of each data line in
/// `[section]`. When `edit` returns `Some(tokens)` the line is replaced by
/// the tokens joined with single spaces; `None` leaves it untouched.
///
/// Returns the new text and the number of lines rewritten.
pub fn rewrite_section<F>(text: &str, section: &str, mut edit: F) -> (String, usize)
where
    F: FnMut(&[&str]) -> Option<Vec<String>>,
{
    let mut out = String::with_capacity(text.len() + 64);
    let mut in_section = false;
    let mut rewritten = 0;

    for line in text.split_inclusive('\n') {
        if line.trim().starts_with('[') {
            in_section = section_header(line)
                .map(|name| name.eq_ignore_ascii_case(section))
                .unwrap_or(false);
            out.push_str(line);
            continue;
        }

        if in_section && is_data_line(line) {
            let (body, ending) = split_line_ending(line);
            let tokens: Vec<&str> = body.split_whitespace().collect();
            if let Some(new_tokens) = edit(&tokens) {
                out.push_str(&new_tokens.join(" "));
                out.push_str(ending);
                rewritten += 1;
                continue;
            }
        }

        out.push_str(line);
    }

    (out, rewritten)
}

/// Collects the first token of every data line in `[section]`.
fn section_ids(text: &str, section: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut in_section = false;
    for line in text.lines() {
        if line.trim().starts_with('[') {
            in_section = section_header(line)
                .map(|name| name.eq_ignore_ascii_case(section))
                .unwrap_or(false);
            continue;
        }
        if in_section && is_data_line(line) {
            if let Some(id) = line.split_whitespace().next() {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

// ---------------------------------------------------------------------------
// Specific rewrites
// ---------------------------------------------------------------------------

/// Points every rain gage at `series` by replacing the trailing token of
/// each `[RAINGAGES]` data line
/// (`Name Format Interval SCF Source Timeseries`).
pub fn swap_rain_series(text: &str, series: &str) -> (String, usize) {
    rewrite_section(text, "RAINGAGES", |tokens| {
        let mut new_tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        let last = new_tokens.last_mut()?;
        *last = series.to_string();
        Some(new_tokens)
    })
}

/// Formats seconds as the `HH:MM:SS` used by SWMM time options.
pub fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

/// Sets `REPORT_STEP` in `[OPTIONS]` so the engine reports at the sampling
/// interval. An inline `;` comment after the value is kept. When the option
/// is absent it is inserted at the top of `[OPTIONS]`, and a missing
/// `[OPTIONS]` section is appended.
///
/// Returns the new text and the number of lines rewritten or inserted.
pub fn set_report_step(text: &str, seconds: u32) -> (String, usize) {
    let clock = format_clock(seconds);
    let (out, rewritten) = rewrite_section(text, "OPTIONS", |tokens| match tokens {
        [key, rest @ ..] if key.eq_ignore_ascii_case("REPORT_STEP") => {
            let (value, trailing) = rest.split_first().map_or(("", &[][..]), |(v, t)| (*v, t));
            let comment = value.find(';').map_or("", |i| &value[i..]);
            let mut new_tokens = vec![key.to_string(), format!("{}{}", clock, comment)];
            new_tokens.extend(trailing.iter().map(|t| t.to_string()));
            Some(new_tokens)
        }
        _ => None,
    });
    if rewritten > 0 {
        return (out, rewritten);
    }

    let option = format!("REPORT_STEP          {}", clock);
    match insert_after_header(&out, "OPTIONS", &option) {
        Some(inserted) => (inserted, 1),
        None => {
            let mut appended = out;
            if !appended.is_empty() && !appended.ends_with('\n') {
                appended.push('\n');
            }
            appended.push_str(&format!("\n[OPTIONS]\n{}\n", option));
            (appended, 1)
        }
    }
}

/// Inserts `line` directly below the `[section]` header, using the header's
/// line ending. `None` when the section does not exist.
fn insert_after_header(text: &str, section: &str, line: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len() + line.len() + 2);
    let mut inserted = false;
    for current in text.split_inclusive('\n') {
        out.push_str(current);
        if inserted || !current.trim().starts_with('[') {
            continue;
        }
        let is_target = section_header(current)
            .map(|name| name.eq_ignore_ascii_case(section))
            .unwrap_or(false);
        if is_target {
            let (_, ending) = split_line_ending(current);
            if ending.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
            out.push_str(if ending.is_empty() { "\n" } else { ending });
            inserted = true;
        }
    }
    inserted.then_some(out)
}

/// All node identifiers defined in the model, in file order.
pub fn list_nodes(text: &str) -> Vec<String> {
    NODE_SECTIONS
        .iter()
        .flat_map(|section| section_ids(text, section))
        .collect()
}

/// Reads a model file and lists its nodes.
pub fn list_nodes_in_file(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::from_io(path, e))?;
    Ok(list_nodes(&text))
}

// ---------------------------------------------------------------------------
// Scenario input files
// ---------------------------------------------------------------------------

/// Keeps scenario and storm names usable as file name fragments
/// (`V&I` stays, `6/27/2023` does not).
fn file_fragment(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.&+".contains(c) { c } else { '_' })
        .collect()
}

/// Writes the scenario's model with the storm swapped in and the report step
/// set, to a fresh temporary file named `<scenario>_<storm>_*.inp`.
///
/// The file is removed when the returned handle is dropped.
pub fn write_scenario_input(
    scenario: &str,
    storm_key: &str,
    storm_series: &str,
    inp: &Path,
    step_seconds: u32,
) -> Result<NamedTempFile> {
    let text = fs::read_to_string(inp).map_err(|e| PipelineError::from_io(inp, e))?;

    let (text, gages) = swap_rain_series(&text, storm_series);
    if gages == 0 {
        logging::warn(
            Stage::Config,
            Some(scenario),
            &format!("no [RAINGAGES] entries in {}; storm left unchanged", inp.display()),
        );
    }
    let (text, _) = set_report_step(&text, step_seconds);

    let prefix = format!("{}_{}_", file_fragment(scenario), file_fragment(storm_key));
    let mut file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".inp")
        .tempfile()
        .map_err(|e| PipelineError::from_io(std::env::temp_dir(), e))?;
    std::io::Write::write_all(&mut file, text.as_bytes())
        .map_err(|e| PipelineError::from_io(file.path(), e))?;
    Ok(file)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "\
[TITLE]
Inner Harbor V23

[OPTIONS]
;;Option             Value
FLOW_UNITS           CFS
REPORT_STEP          00:15:00
ROUTING_STEP         0:00:20

[RAINGAGES]
;;Name           Format    Interval SCF      Source
RG1              INTENSITY 0:05     1.0      TIMESERIES 6/27/23_fullstorm_x2depth

[JUNCTIONS]
;;Name           Elevation  MaxDepth
J12              10.2       8
J12-S            18.2       0.5
J509-S           20.0       0.5

[OUTFALLS]
OF1              0          FREE

[STORAGE]
J40-S            14.0       1.0
";

    #[test]
    fn test_rain_series_swap_replaces_only_trailing_token() {
        let (out, count) = swap_rain_series(MODEL, "6/27/2023");
        assert_eq!(count, 1);

        let original: Vec<&str> = MODEL.lines().collect();
        let rewritten: Vec<&str> = out.lines().collect();
        assert_eq!(original.len(), rewritten.len());

        for (before, after) in original.iter().zip(&rewritten) {
            if before.starts_with("RG1") {
                assert_eq!(*after, "RG1 INTENSITY 0:05 1.0 TIMESERIES 6/27/2023");
            } else {
                assert_eq!(before, after, "non-gage lines must be byte-identical");
            }
        }
    }

    #[test]
    fn test_rewrite_keeps_crlf_line_endings() {
        let text = "[RAINGAGES]\r\nRG1 INTENSITY 0:05 1.0 TIMESERIES old\r\n[JUNCTIONS]\r\n";
        let (out, count) = swap_rain_series(text, "new");
        assert_eq!(count, 1);
        assert_eq!(out, "[RAINGAGES]\r\nRG1 INTENSITY 0:05 1.0 TIMESERIES new\r\n[JUNCTIONS]\r\n");
    }

    #[test]
    fn test_comments_and_blank_lines_inside_section_are_untouched() {
        let text = "[RAINGAGES]\n;; header comment\n\n  \nRG1 V 0:05 1.0 TIMESERIES old\n";
        let (out, count) = swap_rain_series(text, "new");
        assert_eq!(count, 1);
        assert_eq!(out, "[RAINGAGES]\n;; header comment\n\n  \nRG1 V 0:05 1.0 TIMESERIES new\n");
    }

    #[test]
    fn test_model_without_raingages_is_returned_unchanged() {
        let text = "[TITLE]\nno gages\n[JUNCTIONS]\nJ1 1 1\n";
        let (out, count) = swap_rain_series(text, "new");
        assert_eq!(count, 0);
        assert_eq!(out, text);
    }

    #[test]
    fn test_section_header_match_is_case_insensitive() {
        let text = "[raingages]\nRG1 V 0:05 1.0 TIMESERIES old\n";
        let (_, count) = swap_rain_series(text, "new");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_report_step_is_set_in_options() {
        let (out, count) = set_report_step(MODEL, 300);
        assert_eq!(count, 1);
        assert!(out.contains("\nREPORT_STEP 00:05:00\n"));
        assert!(out.contains("ROUTING_STEP         0:00:20"), "other options untouched");
    }

    #[test]
    fn test_report_step_with_inline_comment_is_rewritten() {
        let text = "[OPTIONS]\nREPORT_STEP          00:15:00 ;15 min\nFLOW_UNITS CFS\n";
        let (out, count) = set_report_step(text, 300);
        assert_eq!(count, 1);
        assert_eq!(out, "[OPTIONS]\nREPORT_STEP 00:05:00 ;15 min\nFLOW_UNITS CFS\n");

        let (out, count) = set_report_step("[OPTIONS]\nREPORT_STEP 00:15:00;15min\n", 300);
        assert_eq!(count, 1);
        assert_eq!(out, "[OPTIONS]\nREPORT_STEP 00:05:00;15min\n");
    }

    #[test]
    fn test_missing_report_step_is_inserted_into_options() {
        let text = "[TITLE]\nno step\n\n[OPTIONS]\r\nFLOW_UNITS CFS\r\n\n[JUNCTIONS]\nJ1-S 1 1\n";
        let (out, count) = set_report_step(text, 300);
        assert_eq!(count, 1);
        assert_eq!(
            out,
            "[TITLE]\nno step\n\n[OPTIONS]\r\nREPORT_STEP          00:05:00\r\nFLOW_UNITS CFS\r\n\n[JUNCTIONS]\nJ1-S 1 1\n"
        );
        assert_eq!(list_nodes(&out), ["J1-S"]);
    }

    #[test]
    fn test_missing_options_section_is_appended() {
        let text = "[JUNCTIONS]\nJ1-S 1 1";
        let (out, count) = set_report_step(text, 300);
        assert_eq!(count, 1);
        assert_eq!(out, "[JUNCTIONS]\nJ1-S 1 1\n\n[OPTIONS]\nREPORT_STEP          00:05:00\n");
        assert_eq!(list_nodes(&out), ["J1-S"], "appended section leaves nodes intact");
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(300), "00:05:00");
        assert_eq!(format_clock(3661), "01:01:01");
    }

    #[test]
    fn test_list_nodes_covers_all_node_sections_in_order() {
        let nodes = list_nodes(MODEL);
        assert_eq!(nodes, ["J12", "J12-S", "J509-S", "OF1", "J40-S"]);
    }

    #[test]
    fn test_scenario_input_is_written_to_unique_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let inp = dir.path().join("model.inp");
        std::fs::write(&inp, MODEL).unwrap();

        let a = write_scenario_input("V&I", "6_27_23", "6/27/2023", &inp, 300).unwrap();
        let b = write_scenario_input("V&I", "6_27_23", "6/27/2023", &inp, 300).unwrap();
        assert_ne!(a.path(), b.path(), "temp inputs must not collide");

        let name = a.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("V&I_6_27_23_"), "got {}", name);
        assert!(name.ends_with(".inp"));

        let written = std::fs::read_to_string(a.path()).unwrap();
        assert!(written.contains("TIMESERIES 6/27/2023"));
        assert!(written.contains("REPORT_STEP 00:05:00"));
    }

    #[test]
    fn test_missing_model_file_is_fatal() {
        let err = write_scenario_input("Base", "s", "s", Path::new("/nonexistent/m.inp"), 300)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingFile(_)));
    }
}
