//! Job Queue & Worker (spec §4.10): the `generation_jobs` table and the
//! single-process polling worker that drains it.

pub mod queue;
pub mod worker;

pub use queue::{GenerationJob, JobQueue, JobStatus};
