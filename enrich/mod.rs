// Reference gene sets and per-sample enrichment scoring.

pub mod download;
pub mod genesets;
pub mod gsva;
