/// Node → neighborhood / historic stream reference data.
///
/// This is the single source of truth for the spatial grouping of street
/// nodes. It is loaded once at startup; every node that reaches the
/// analyzer must have an entry here.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::model::{PipelineError, Result};

/// Spatial context of one street node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLocation {
    pub neighborhood: String,
    pub historic_stream: String,
}

#[derive(Debug, Deserialize)]
struct MetadataRecord {
    street_node_id: String,
    neighborhood: String,
    historic_stream: String,
}

/// Static mapping from node identifier to its neighborhood and the
/// historic (buried) stream it sits on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMetadata {
    entries: HashMap<String, NodeLocation>,
}

impl NodeMetadata {
    pub fn insert(&mut self, node_id: &str, neighborhood: &str, historic_stream: &str) {
        self.entries.insert(
            node_id.to_string(),
            NodeLocation {
                neighborhood: neighborhood.to_string(),
                historic_stream: historic_stream.to_string(),
            },
        );
    }

    /// Looks up a node; a missing entry is `MissingMetadata`.
    pub fn lookup(&self, node_id: &str) -> Result<&NodeLocation> {
        self.entries
            .get(node_id)
            .ok_or_else(|| PipelineError::MissingMetadata(node_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reads the reference CSV (`street_node_id,neighborhood,historic_stream`).
/// Surrounding whitespace in cells is trimmed; later duplicates win.
pub fn load_metadata(path: &Path) -> Result<NodeMetadata> {
    if !path.is_file() {
        return Err(PipelineError::MissingFile(path.to_path_buf()));
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| PipelineError::csv(path, e))?;

    let mut metadata = NodeMetadata::default();
    for result in reader.deserialize() {
        let record: MetadataRecord = result.map_err(|e| PipelineError::csv(path, e))?;
        metadata.insert(&record.street_node_id, &record.neighborhood, &record.historic_stream);
    }
    Ok(metadata)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
