use anyhow::{Context, Result};
use clap::Parser;
use lookalike::config::{DEFAULT_MAX_DIFFERENCES, DEFAULT_MIN_FEATURES};
use lookalike::report::{self, Reporter};
use lookalike::review::{CommandReviewer, NullReviewer, PairReviewer};
use lookalike::{scan, Pipeline, PipelineConfig};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "lookalike",
    version,
    about = "Find visually similar images in a directory tree"
)]
struct Cli {
    /// Root directory to search (jpg, jpeg, png; recursive)
    path: PathBuf,

    /// Max weighted signature differences to consider a pair similar
    /// (0 essentially identical, 20 somewhat similar)
    #[arg(long, default_value_t = DEFAULT_MAX_DIFFERENCES)]
    max_differences: u32,

    /// Structural-similarity lower bound, 0.0 (dissimilar) to 1.0
    /// (identical); enables the refinement cascade
    #[arg(long)]
    mssim: Option<f64>,

    /// Minimum feature matches to accept a pair the structural check
    /// flagged as dissimilar
    #[arg(long, default_value_t = DEFAULT_MIN_FEATURES)]
    features: usize,

    /// Do not show accepted pairs via the review command
    #[arg(long)]
    no_display: bool,

    /// Additionally write raw per-bit signature vectors
    #[arg(long)]
    signature_out: bool,

    /// Command invoked with both paths of an accepted pair
    #[arg(long, value_name = "CMD", default_value = "image-edit")]
    review_cmd: String,

    /// Report file for accepted pairs
    #[arg(long, value_name = "FILE", default_value = "similar-images.txt")]
    report: PathBuf,

    /// Signature vector file (with --signature-out)
    #[arg(long, value_name = "FILE", default_value = "signature-vectors.txt")]
    vectors: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = PipelineConfig {
        max_differences: cli.max_differences,
        structural_threshold: cli.mssim,
        min_features: cli.features,
        display: !cli.no_display,
        signature_out: cli.signature_out,
        review_command: cli.review_cmd,
    };
    config.validate().context("rejecting run")?;

    println!("▶ Searching for images in: {}", cli.path.display());
    let files = scan::discover_images(&cli.path)?;
    if files.is_empty() {
        println!("No images found.");
        return Ok(());
    }

    let pipeline = Pipeline::new(config);

    let (store, extraction) = benchmark("signature extraction", || pipeline.extract(&files));
    println!(
        "▶ Indexed {} of {} image(s) ({} decode failure(s))",
        extraction.indexed, extraction.discovered, extraction.decode_failures
    );

    if pipeline.config().signature_out {
        report::write_signature_vectors(&cli.vectors, &store)
            .with_context(|| format!("Failed to write vectors to {:?}", cli.vectors))?;
        println!("▶ Signature vectors written to {}", cli.vectors.display());
    }

    let mut reporter = Reporter::create(&cli.report, true)
        .with_context(|| format!("Failed to create report {:?}", cli.report))?;
    let trail = cli
        .report
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join(".review.jsonl");

    let mut command_reviewer;
    let mut null_reviewer;
    let reviewer: &mut dyn PairReviewer = if pipeline.config().display {
        command_reviewer = CommandReviewer::new(pipeline.config().review_command.clone(), trail);
        &mut command_reviewer
    } else {
        null_reviewer = NullReviewer;
        &mut null_reviewer
    };

    let comparison = benchmark("pair comparison", || {
        pipeline.compare(&store, &mut reporter, reviewer)
    })?;
    let accepted = reporter.finish()?;

    println!(
        "\n✅ Compared {} pair(s), {} candidate(s), {} similar pair(s) recorded in {}",
        comparison.pairs_compared,
        comparison.candidates,
        accepted,
        cli.report.display()
    );
    Ok(())
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
