/// Report text repair.
///
/// SWMM report (`.rpt`) files written by some GUI builds contain a raw
/// superscript-3 (`ft³`) that breaks strict UTF-8 readers. Only report text
/// passes through here; node samples never do.

use std::fs;
use std::path::{Path, PathBuf};

use crate::model::{PipelineError, Result};

const SUPERSCRIPT_THREE: &[u8] = b"\xc2\xb3";

/// Replaces `0xC2 0xB3` with ASCII `3`, then decodes the remainder as UTF-8
/// with invalid sequences replaced by U+FFFD.
pub fn clean_report_bytes(bytes: &[u8]) -> String {
    let mut patched = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(SUPERSCRIPT_THREE) {
            patched.push(b'3');
            i += SUPERSCRIPT_THREE.len();
        } else {
            patched.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&patched).into_owned()
}

/// Reads a report file as cleaned text.
pub fn read_report_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| PipelineError::from_io(path, e))?;
    Ok(clean_report_bytes(&bytes))
}

/// Cleans a report file in place, or into `<stem>_cleaned.rpt` beside it.
/// Returns the path written.
pub fn clean_report_file(path: &Path, in_place: bool) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(PipelineError::MissingFile(path.to_path_buf()));
    }
    let text = read_report_text(path)?;

    let output = if in_place {
        path.to_path_buf()
    } else {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("report");
        path.with_file_name(format!("{}_cleaned.rpt", stem))
    };
    fs::write(&output, text).map_err(|e| PipelineError::from_io(&output, e))?;
    Ok(output)
}

/// `ERROR ...` lines from a report, used to explain a failed run.
pub fn report_errors(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("ERROR"))
        .map(String::from)
        .collect()
}
