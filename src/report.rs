//! Report streams: the accepted-pair log and the optional raw signature
//! vector dump for external analysis.

use crate::candidates::CandidatePair;
use crate::signature::{ACTIVE_CHANNELS, SIGNATURE_BITS};
use crate::store::{ImageRecord, SignatureStore};
use chrono::Utc;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Append-only writer for accepted pairs, one line each.
///
/// Line format, fixed delimiters, 0 sentinels for metrics that never ran:
/// `hamming(2 digits), structural(2 decimals), matches, idA:idB, pathA || pathB`
pub struct Reporter {
    out: BufWriter<File>,
    echo: bool,
    accepted: usize,
}

impl Reporter {
    /// Create (truncate) the report file and write the run header.
    pub fn create(path: &Path, echo: bool) -> io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "# lookalike run {}", Utc::now().to_rfc3339())?;
        Ok(Self {
            out,
            echo,
            accepted: 0,
        })
    }

    /// Record one accepted pair with every metric that was computed.
    pub fn record(
        &mut self,
        pair: &CandidatePair,
        a: &ImageRecord,
        b: &ImageRecord,
    ) -> io::Result<()> {
        let line = format_pair(pair, a, b);
        writeln!(self.out, "{line}")?;
        if self.echo {
            println!("{line}");
        }
        self.accepted += 1;
        Ok(())
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn finish(mut self) -> io::Result<usize> {
        self.out.flush()?;
        Ok(self.accepted)
    }
}

fn format_pair(pair: &CandidatePair, a: &ImageRecord, b: &ImageRecord) -> String {
    format!(
        "{:02}, {:4.2}, {}, {}:{}, {} || {}",
        pair.hamming,
        pair.structural.unwrap_or(0.0),
        pair.feature_matches.unwrap_or(0),
        pair.id_a,
        pair.id_b,
        a.path.display(),
        b.path.display()
    )
}

/// Dump every record's raw signature bits: a dimensionality header, then per
/// image a label line and one `0`/`1` line per bit, luma plane first.
///
/// The format feeds self-organizing-map style external tooling, which wants
/// one dimension per line.
pub fn write_signature_vectors(path: &Path, store: &SignatureStore) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", SIGNATURE_BITS * ACTIVE_CHANNELS.len() as u32)?;
    for record in store.iter() {
        writeln!(out, "id{} {}", record.id, record.path.display())?;
        for plane in record.signature.planes() {
            for bit in 0..SIGNATURE_BITS {
                writeln!(out, "{}", (plane >> bit) & 1)?;
            }
        }
    }
    out.flush()
}
