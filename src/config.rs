use crate::error::PipelineError;

/// Default signature-stage bound. Works well when all three channel planes
/// are active; 9 is a better fit when only luma is compared.
pub const DEFAULT_MAX_DIFFERENCES: u32 = 12;

/// Default minimum feature-match count for the tie-breaker stage.
pub const DEFAULT_MIN_FEATURES: usize = 10;

/// Everything a run needs to decide which pairs are similar.
///
/// Built once in `main` before extraction starts and threaded through the
/// pipeline explicitly; there is no ambient global state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum weighted Hamming score for a pair to become a candidate.
    pub max_differences: u32,
    /// Structural-similarity lower bound. `None` disables the whole
    /// refinement cascade; candidates are then reported as-is.
    pub structural_threshold: Option<f64>,
    /// Minimum accepted feature matches when the tie-breaker runs.
    pub min_features: usize,
    /// Show accepted pairs to the user via the review command.
    pub display: bool,
    /// Additionally emit raw per-bit signature vectors.
    pub signature_out: bool,
    /// External command invoked with both paths of an accepted pair.
    pub review_command: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_differences: DEFAULT_MAX_DIFFERENCES,
            structural_threshold: None,
            min_features: DEFAULT_MIN_FEATURES,
            display: true,
            signature_out: false,
            review_command: "image-edit".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Fail fast on malformed numeric options, before any file is touched.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if let Some(t) = self.structural_threshold {
            if !(0.0..=1.0).contains(&t) || t.is_nan() {
                return Err(PipelineError::Config(format!(
                    "mssim must be between 0.0 and 1.0, got {t}"
                )));
            }
        }
        Ok(())
    }

    /// Threshold for the structural stage when it should actually run.
    /// `None` when the stage is disabled or the threshold is 0; a zero
    /// threshold accepts every candidate, so there is nothing to measure.
    pub fn effective_structural_threshold(&self) -> Option<f64> {
        self.structural_threshold.filter(|&t| t > 0.0)
    }
}
