use std::path::PathBuf;
use thiserror::Error;

/// Faults the pipeline can hit while working through a corpus.
///
/// Only `Config` is fatal; everything else is logged and skipped so a single
/// bad file never aborts the remaining report.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot decode image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("file no longer exists: {path:?}")]
    MissingFile { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("review command failed: {source}")]
    Review {
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
