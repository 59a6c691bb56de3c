pub mod analyzer;
pub mod partitioner;
pub mod provenance;

pub use analyzer::{analyze_repository, detect_crates, CrateMarker, RepoAnalysis};
pub use partitioner::{partition_for_documentation, partition_with_bounds};
pub use provenance::{compute_source_hashes, extract_source_references};
