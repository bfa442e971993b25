//! Find visually similar images in a directory tree for manual triage.
//!
//! Each image is reduced to compact per-channel bit signatures; all unordered
//! pairs are then compared with a weighted Hamming distance, and ambiguous
//! candidates are escalated through a structural-similarity check and, on
//! disagreement, a local-feature correspondence count. Accepted pairs go to
//! an append-only report and, optionally, to an external review command so a
//! human can decide what to keep.

pub mod candidates;
pub mod config;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod report;
pub mod review;
pub mod scan;
pub mod signature;
pub mod ssim;
pub mod store;

pub use candidates::{hamming_score, CandidatePair};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::Pipeline;
pub use signature::SignatureSet;
pub use store::{ImageRecord, SignatureStore};
