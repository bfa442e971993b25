//! Interactive review of accepted pairs via an external command.
//!
//! The decision core stays side-effect-free by talking to a capability
//! trait; the real implementation shells out to a user-configured editor or
//! viewer with both paths and records what happened in a JSONL trail next to
//! the report.

use crate::error::PipelineError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// What the review step did for one pair. The exit status is recorded but
/// never interpreted; only the human decides what to do with the files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// Command ran to completion with this exit code (None if killed).
    Completed(Option<i32>),
    /// Review was not attempted (display disabled, or files unavailable).
    Skipped,
}

/// One line of the `.review.jsonl` trail.
#[derive(Serialize, Deserialize, Debug)]
struct ReviewRecord {
    timestamp: String,
    path_a: String,
    path_b: String,
    status: String,
}

/// Capability seam for showing a pair to a human.
pub trait PairReviewer {
    fn review(&mut self, a: &Path, b: &Path) -> Result<ReviewOutcome, PipelineError>;
}

/// Spawns `<command> <pathA> <pathB>` and blocks until it exits.
pub struct CommandReviewer {
    command: String,
    trail_path: PathBuf,
}

impl CommandReviewer {
    pub fn new(command: impl Into<String>, trail_path: PathBuf) -> Self {
        Self {
            command: command.into(),
            trail_path,
        }
    }

    fn append_trail(&self, a: &Path, b: &Path, status: &str) {
        let record = ReviewRecord {
            timestamp: Utc::now().to_rfc3339(),
            path_a: a.to_string_lossy().into_owned(),
            path_b: b.to_string_lossy().into_owned(),
            status: status.to_string(),
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.trail_path)
            .and_then(|mut out| writeln!(out, "{}", serde_json::to_string(&record)?));
        if let Err(err) = result {
            log::warn!("could not append review trail {:?}: {err}", self.trail_path);
        }
    }
}

impl PairReviewer for CommandReviewer {
    fn review(&mut self, a: &Path, b: &Path) -> Result<ReviewOutcome, PipelineError> {
        let status = Command::new(&self.command)
            .arg(a)
            .arg(b)
            .status()
            .map_err(|source| PipelineError::Review { source })?;
        log::info!(
            "review command {:?} exited with {status} for {:?} / {:?}",
            self.command,
            a,
            b
        );
        self.append_trail(a, b, &status.to_string());
        Ok(ReviewOutcome::Completed(status.code()))
    }
}

/// Reviewer used with `--no-display`: does nothing, accepts everything the
/// pipeline already decided.
pub struct NullReviewer;

impl PairReviewer for NullReviewer {
    fn review(&mut self, _a: &Path, _b: &Path) -> Result<ReviewOutcome, PipelineError> {
        Ok(ReviewOutcome::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn null_reviewer_always_skips() {
        let mut reviewer = NullReviewer;
        let outcome = reviewer
            .review(Path::new("a.png"), Path::new("b.png"))
            .unwrap();
        assert_eq!(outcome, ReviewOutcome::Skipped);
    }

    #[cfg(unix)]
    #[test]
    fn command_reviewer_records_exit_status_without_interpreting_it() {
        let dir = tempfile::tempdir().unwrap();
        let trail = dir.path().join(".review.jsonl");
        // `false` exits nonzero; the reviewer must still report success.
        let mut reviewer = CommandReviewer::new("false", trail.clone());
        let outcome = reviewer
            .review(Path::new("a.png"), Path::new("b.png"))
            .unwrap();
        assert_eq!(outcome, ReviewOutcome::Completed(Some(1)));

        let content = fs::read_to_string(&trail).unwrap();
        let record: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(record["path_a"], "a.png");
        assert_eq!(record["path_b"], "b.png");
    }

    #[cfg(unix)]
    #[test]
    fn missing_command_is_a_review_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut reviewer = CommandReviewer::new(
            "definitely-not-a-real-command-xyz",
            dir.path().join(".review.jsonl"),
        );
        let err = reviewer.review(Path::new("a"), Path::new("b")).unwrap_err();
        assert!(matches!(err, PipelineError::Review { .. }));
    }
}
