pub mod analyzer;
pub mod collector;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod inp;
pub mod logging;
pub mod metadata;
pub mod model;
pub mod pipeline;
pub mod reducer;
pub mod table;
