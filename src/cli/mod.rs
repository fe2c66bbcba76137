//! CLI commands for Tally.
//!
//! The binary is a thin host around the aggregator: it reads payloads,
//! feeds them through `Aggregator::ingest` and prints the export.

pub mod ingest;

pub use ingest::{IngestCommand, IngestOptions, IngestOutput, RejectedLine};
