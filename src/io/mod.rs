//! Document loading and artifact persistence.

pub mod loader;
pub mod store;

pub use loader::{Document, ParseFailure, load_document, parse_document};
pub use store::{ArtifactStore, COHORTS_FILE, GRAPH_FILE, REPORT_FILE};
