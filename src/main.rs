#![deny(unsafe_code)]

//! `remate`: reconstruct mate pairs from a SAM stream.
//!
//! Reads a SAM stream whose mates may be separated by any number of other
//! records (e.g. position-grouped output converted back to reads) and writes
//! interleaved FASTQ of the reconstructed pairs. Reads whose mate never
//! appears are dropped and reported at end of input.

use anyhow::{Context, Result};
use clap::Parser;
use clap::builder::styling::{AnsiColor, Effects, Styles};
use env_logger::Env;
use log::info;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use remate_lib::logging::{format_count, format_duration};
use remate_lib::progress::ProgressTracker;
use remate_lib::supplier::DEFAULT_RECORDS_PER_BATCH;
use remate_lib::{Batch, PairMatcher, Read, SamBatchReader};

/// Custom styles for CLI help output
const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// Command-line arguments for `remate`
#[derive(Parser, Debug)]
#[command(
    name = "remate",
    author,
    version,
    styles = STYLES,
    about = "Reconstruct mate pairs from a SAM stream",
    long_about = "\
Reconstructs mate pairs from SAM input where mates may appear far apart or out
of order, emitting interleaved FASTQ. Matching holds only a two-batch window
of unmatched reads in shared buffers; reads separated further are kept as
compact private copies, so memory stays bounded by the unpaired residue rather
than the input size."
)]
struct Args {
    /// Input SAM file (or `-` for stdin)
    #[arg(short = 'i', long, default_value = "-")]
    input: PathBuf,

    /// Output interleaved FASTQ file (or `-` for stdout)
    #[arg(short = 'o', long, default_value = "-")]
    output: PathBuf,

    /// Discard reads whose RNEXT/PNEXT fields are unset instead of trying
    /// to match them (useful when single-end records are mixed in)
    #[arg(long)]
    quick_drop_unpaired: bool,

    /// Verify that no two distinct read names share a match key (slower,
    /// keeps a name table in memory)
    #[arg(long)]
    validate_keys: bool,

    /// Records per supplier batch
    #[arg(long, default_value_t = DEFAULT_RECORDS_PER_BATCH)]
    batch_records: usize,
}

fn open_input(path: &PathBuf) -> Result<Box<dyn BufRead>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn open_output(path: &PathBuf) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(BufWriter::new(io::stdout())))
    } else {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

fn write_fastq(out: &mut dyn Write, read: &Read) -> io::Result<()> {
    out.write_all(b"@")?;
    out.write_all(read.id())?;
    out.write_all(b"\n")?;
    out.write_all(read.seq())?;
    out.write_all(b"\n+\n")?;
    out.write_all(read.qual())?;
    out.write_all(b"\n")
}

fn run(args: &Args) -> Result<()> {
    let started = Instant::now();
    let input = open_input(&args.input)?;
    let mut output = open_output(&args.output)?;

    let supplier = SamBatchReader::with_batch_size(input, args.batch_records);
    let mut matcher = PairMatcher::new(supplier)
        .with_quick_drop(args.quick_drop_unpaired)
        .with_key_validation(args.validate_keys);

    let mut progress = ProgressTracker::new("emitted pairs");
    // batch the CLI currently depends on; held on first sight, released
    // (through the matcher, so parked overflow records get freed) once the
    // output moves past it
    let mut held: Option<Batch> = None;

    while let Some(pair) = matcher.next_pair().context("matching pairs")? {
        let batch = pair.r1.batch();
        if held != Some(batch) {
            matcher.hold_batch(batch);
            if let Some(prior) = held.replace(batch) {
                matcher.release_batch(prior);
            }
        }
        write_fastq(output.as_mut(), &pair.r1).context("writing output")?;
        write_fastq(output.as_mut(), &pair.r2).context("writing output")?;
        progress.record(1);
    }
    if let Some(prior) = held {
        matcher.release_batch(prior);
    }
    output.flush().context("flushing output")?;
    progress.log_final();

    info!(
        "done: {} pairs ({} via overflow), {} reads dropped, {} unmatched, {}",
        format_count(progress.count()),
        format_count(matcher.overflow_matched()),
        format_count(matcher.reads_dropped()),
        format_count(matcher.pending_unmatched() as u64),
        format_duration(started.elapsed())
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    run(&args)
}
