//! Pipeline orchestration: extraction over the corpus, then the quadratic
//! comparison with its staged decision policy.
//!
//! All run state lives in an explicit [`Pipeline`] value constructed before
//! extraction and dropped at the end; nothing is ambient.

use crate::candidates::{self, CandidatePair};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::FeatureMatcher;
use crate::report::Reporter;
use crate::review::PairReviewer;
use crate::signature;
use crate::ssim;
use crate::store::{ImageRecord, SignatureStore};
use anyhow::Result;
use dialoguer::Confirm;
use image::{DynamicImage, ImageReader};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Outcome of the per-pair state machine.
#[derive(Debug)]
pub struct PairVerdict {
    pub pair: CandidatePair,
    pub accepted: bool,
    /// False when a source file vanished between extraction and comparison;
    /// the pair is then reported on its signature verdict alone and cannot
    /// be shown for interactive review.
    pub reviewable: bool,
}

/// Counters from the extraction phase.
#[derive(Debug, Default)]
pub struct ExtractionStats {
    pub discovered: usize,
    pub indexed: usize,
    pub decode_failures: usize,
    pub single_channel: usize,
}

/// Counters from the comparison phase.
#[derive(Debug, Default)]
pub struct ComparisonStats {
    pub pairs_compared: u64,
    pub candidates: u64,
    pub accepted: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    matcher: FeatureMatcher,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            matcher: FeatureMatcher::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Phase one: decode every discovered file and append its signatures to
    /// a fresh store. Ids are assigned at discovery time, before any decoding
    /// happens, so the record order is stable no matter how the worker pool
    /// schedules the files.
    ///
    /// A file that fails to decode is skipped for good: logged, no record,
    /// the rest of the corpus continues.
    pub fn extract(&self, files: &[PathBuf]) -> (SignatureStore, ExtractionStats) {
        let bar = ProgressBar::new(files.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "Extracting signatures [{bar:40.cyan/blue}] {pos}/{len}",
            )
            .expect("static template"),
        );

        let results: Vec<Option<(u32, signature::SignatureSet, bool)>> = files
            .par_iter()
            .enumerate()
            .map(|(index, path)| {
                let id = index as u32 + 1;
                let result = match load_image(path) {
                    Ok(img) => Some((id, signature::extract(&img), signature::is_single_channel(&img))),
                    Err(err) => {
                        log::warn!("skipping image {id}: {err}");
                        None
                    }
                };
                bar.inc(1);
                result
            })
            .collect();
        bar.finish();

        let mut store = SignatureStore::new();
        let mut stats = ExtractionStats {
            discovered: files.len(),
            ..Default::default()
        };
        for (index, entry) in results.into_iter().enumerate() {
            match entry {
                Some((id, sig, single_channel)) => {
                    store.push(ImageRecord {
                        id,
                        signature: sig,
                        path: files[index].clone(),
                    });
                    stats.indexed += 1;
                    stats.single_channel += usize::from(single_channel);
                }
                None => stats.decode_failures += 1,
            }
        }
        if stats.single_channel > 0 {
            // Chroma signatures of gray sources duplicate the luma plane;
            // worth knowing when reading the scores.
            log::info!(
                "{} single-channel source(s): their chroma signatures repeat the luma plane",
                stats.single_channel
            );
        }
        (store, stats)
    }

    /// Phase two: visit every unordered pair once, run the decision policy,
    /// report accepted pairs and hand them to the reviewer.
    ///
    /// The user can stop the *display* of further pairs; scoring and
    /// reporting of the remaining corpus always run to completion.
    pub fn compare(
        &self,
        store: &SignatureStore,
        reporter: &mut Reporter,
        reviewer: &mut dyn PairReviewer,
    ) -> Result<ComparisonStats> {
        let total_pairs = store.len() * store.len().saturating_sub(1) / 2;
        let bar = ProgressBar::new(total_pairs as u64);
        bar.set_style(
            ProgressStyle::with_template("Comparing [{bar:40.green/white}] {pos}/{len}")
                .expect("static template"),
        );

        let mut stats = ComparisonStats::default();
        let mut display = self.config.display;

        for (a, b, score) in candidates::enumerate(store) {
            stats.pairs_compared += 1;
            bar.inc(1);
            if score > self.config.max_differences {
                continue;
            }
            stats.candidates += 1;

            let verdict = self.refine(a, b, score);
            if !verdict.accepted {
                continue;
            }
            reporter.record(&verdict.pair, a, b)?;
            stats.accepted += 1;

            if !display {
                continue;
            }
            if !verdict.reviewable {
                log::warn!(
                    "pair {}:{} not available for review (file missing)",
                    a.id,
                    b.id
                );
                continue;
            }
            if let Err(err) = reviewer.review(&a.path, &b.path) {
                // The collaborator is advisory; its failures never stop
                // the run.
                log::warn!("{err}");
            }
            if !continue_display() {
                display = false;
                println!("Display stopped; the full report still completes.");
            }
        }
        bar.finish();
        Ok(stats)
    }

    /// Per-pair refinement cascade, entered only for signature candidates:
    ///
    /// ```text
    /// structural stage disabled        -> ACCEPT
    /// a source file missing            -> ACCEPT on the signature verdict,
    ///                                     flagged unreviewable
    /// structural index >= threshold    -> ACCEPT
    /// feature matches >= min_features  -> ACCEPT, else REJECT
    /// ```
    fn refine(&self, a: &ImageRecord, b: &ImageRecord, score: u32) -> PairVerdict {
        let mut pair = CandidatePair::new(a.id, b.id, score);

        // A disabled stage and a zero threshold both accept every candidate,
        // so there is nothing worth decoding.
        let Some(threshold) = self.config.effective_structural_threshold() else {
            return PairVerdict {
                pair,
                accepted: true,
                reviewable: both_exist(a, b),
            };
        };

        // Refinement re-reads the full images; a file deleted or moved since
        // extraction falls back to the signature-only verdict.
        let images = load_image(&a.path).and_then(|ia| Ok((ia, load_image(&b.path)?)));
        let (image_a, image_b) = match images {
            Ok(pair_images) => pair_images,
            Err(err) => {
                log::warn!(
                    "pair {}:{} kept on signature verdict alone: {err}",
                    a.id,
                    b.id
                );
                return PairVerdict {
                    pair,
                    accepted: true,
                    reviewable: false,
                };
            }
        };

        let index = ssim::structural_index(&image_a, &image_b);
        pair.structural = Some(index);
        let (matches, accepted) = cascade(
            threshold,
            index,
            || self.matcher.matched_features(&image_a, &image_b),
            self.config.min_features,
        );
        pair.feature_matches = matches;
        PairVerdict {
            pair,
            accepted,
            reviewable: true,
        }
    }
}

/// Tail of the decision policy once the structural index is known. The
/// tie-breaker is invoked only when the cheap filter and the structural index
/// disagree; its match count is the decisive verdict.
fn cascade(
    threshold: f64,
    index: f64,
    matched: impl FnOnce() -> usize,
    min_features: usize,
) -> (Option<usize>, bool) {
    if index >= threshold {
        return (None, true);
    }
    let matches = matched();
    (Some(matches), matches >= min_features)
}

fn both_exist(a: &ImageRecord, b: &ImageRecord) -> bool {
    a.path.exists() && b.path.exists()
}

/// Decode one image, distinguishing a vanished file from a corrupt one.
fn load_image(path: &Path) -> Result<DynamicImage, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let reader = ImageReader::open(path).map_err(|source| PipelineError::Decode {
        path: path.to_path_buf(),
        source: image::ImageError::IoError(source),
    })?;
    reader.decode().map_err(|source| PipelineError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Ask whether to keep showing pairs. Anything but an explicit yes (a closed
/// terminal included) stops the display; computation is unaffected.
fn continue_display() -> bool {
    Confirm::new()
        .with_prompt("Continue reviewing similar pairs?")
        .default(true)
        .interact()
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::NullReviewer;
    use crate::signature::SignatureSet;

    fn fake_record(id: u32, luma: u64) -> ImageRecord {
        ImageRecord {
            id,
            signature: SignatureSet {
                luma,
                ..Default::default()
            },
            path: PathBuf::from(format!("/nonexistent/{id}.png")),
        }
    }

    fn quiet_config() -> PipelineConfig {
        PipelineConfig {
            display: false,
            ..Default::default()
        }
    }

    #[test]
    fn signature_only_run_reports_every_candidate() {
        // With the structural stage disabled the refinement cascade must
        // never be entered, so records pointing at nonexistent files are
        // accepted purely on their signatures.
        let pipeline = Pipeline::new(quiet_config());
        let mut store = SignatureStore::new();
        store.push(fake_record(1, 0));
        store.push(fake_record(2, 0b11111)); // score 5 <= 12
        store.push(fake_record(3, u64::MAX)); // far from both

        let dir = tempfile::tempdir().unwrap();
        let mut reporter = Reporter::create(&dir.path().join("report.txt"), false).unwrap();
        let stats = pipeline
            .compare(&store, &mut reporter, &mut NullReviewer)
            .unwrap();

        assert_eq!(stats.pairs_compared, 3);
        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.accepted, 1);
    }

    #[test]
    fn missing_files_fall_back_to_the_signature_verdict() {
        let config = PipelineConfig {
            structural_threshold: Some(0.5),
            display: false,
            ..Default::default()
        };
        let pipeline = Pipeline::new(config);
        let a = fake_record(1, 0);
        let b = fake_record(2, 1);

        let verdict = pipeline.refine(&a, &b, 1);
        assert!(verdict.accepted);
        assert!(!verdict.reviewable);
        assert_eq!(verdict.pair.structural, None);
        assert_eq!(verdict.pair.feature_matches, None);
    }

    #[test]
    fn self_comparison_is_always_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("self.png");
        let img = image::GrayImage::from_fn(64, 64, |x, y| image::Luma([((x * 5) ^ (y * 3)) as u8]));
        img.save(&path).unwrap();

        let config = PipelineConfig {
            structural_threshold: Some(1.0), // strictest possible
            display: false,
            ..Default::default()
        };
        let pipeline = Pipeline::new(config);
        let decoded = load_image(&path).unwrap();
        let signature = signature::extract(&decoded);
        let a = ImageRecord {
            id: 1,
            signature,
            path: path.clone(),
        };
        let b = ImageRecord {
            id: 2,
            signature,
            path,
        };

        assert_eq!(candidates::hamming_score(&a.signature, &b.signature), 0);
        let verdict = pipeline.refine(&a, &b, 0);
        assert!(verdict.accepted);
        assert_eq!(verdict.pair.structural, Some(1.0));
    }

    #[test]
    fn zero_threshold_accepts_without_computing_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.png");
        let path_b = dir.path().join("b.png");
        image::GrayImage::from_pixel(32, 32, image::Luma([0]))
            .save(&path_a)
            .unwrap();
        image::GrayImage::from_pixel(32, 32, image::Luma([255]))
            .save(&path_b)
            .unwrap();

        let config = PipelineConfig {
            structural_threshold: Some(0.0),
            display: false,
            ..Default::default()
        };
        let pipeline = Pipeline::new(config);
        let a = ImageRecord {
            id: 1,
            signature: SignatureSet::default(),
            path: path_a,
        };
        let b = ImageRecord {
            id: 2,
            signature: SignatureSet::default(),
            path: path_b,
        };

        let verdict = pipeline.refine(&a, &b, 0);
        assert!(verdict.accepted);
        assert_eq!(verdict.pair.structural, None);
    }

    #[test]
    fn tie_breaker_runs_only_on_disagreement() {
        // Structural index clears the bar: accepted, tie-breaker untouched.
        let (matches, accepted) = cascade(0.5, 0.7, || unreachable!(), 10);
        assert_eq!(matches, None);
        assert!(accepted);

        // Disagreement with too few correspondences: rejected.
        let (matches, accepted) = cascade(0.5, 0.3, || 3, 10);
        assert_eq!(matches, Some(3));
        assert!(!accepted);

        // Disagreement resolved by a decisive match count: accepted.
        let (matches, accepted) = cascade(0.5, 0.3, || 12, 10);
        assert_eq!(matches, Some(12));
        assert!(accepted);
    }

    #[test]
    fn decode_failures_skip_the_file_but_keep_the_id_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        let bad = dir.path().join("bad.png");
        image::GrayImage::from_pixel(16, 16, image::Luma([10]))
            .save(&good)
            .unwrap();
        std::fs::write(&bad, b"not an image at all").unwrap();

        let pipeline = Pipeline::new(quiet_config());
        let files = vec![bad, good];
        let (store, stats) = pipeline.extract(&files);

        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.indexed, 1);
        // The surviving record keeps the id it got at discovery time.
        assert_eq!(store.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
    }
}
