//! mirror-dma: reflect-pad a matrix through the cycle-stepped DMA model

use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};

use mirror_dma::config::Config;
use mirror_dma::testing::{run_padding, seeded_matrix, PadRun, RunOutcome};

const DEFAULT_WIDTH: usize = 8;
const DEFAULT_SEED: u64 = 1;

const USAGE: &str = "\
usage: mirror-dma [options]

  --width N          source matrix width (default 8, or inferred from --input)
  --seed S           seed for the generated matrix (default 1)
  --input FILE       raw little-endian u32 source matrix
  --config FILE      extra config file merged over the usual ones
  --dump             print the source and padded matrices
  --sample-config    print a sample config file and exit

RUST_LOG controls log verbosity.";

#[derive(Debug, Default)]
struct Options {
    width: Option<usize>,
    seed: Option<u64>,
    input: Option<String>,
    config: Option<String>,
    dump: bool,
    sample_config: bool,
    help: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let opts = parse_args(&args[1..])?;

    if opts.help {
        println!("{}", USAGE);
        return Ok(());
    }
    if opts.sample_config {
        print!("{}", Config::sample_config());
        return Ok(());
    }

    let config = match &opts.config {
        Some(path) => {
            let mut config = Config::load();
            config.merge(Config::from_file(Path::new(path))?);
            config
        }
        None => Config::get().clone(),
    };
    let engine = config.engine_config();
    let timing = config.bus_timing();

    let (input, width) = match &opts.input {
        Some(path) => {
            let words = read_matrix(Path::new(path))?;
            let width = matrix_width(words.len(), opts.width)
                .with_context(|| format!("{} does not hold a usable square matrix", path))?;
            (words, width)
        }
        None => {
            let width = opts.width.unwrap_or(DEFAULT_WIDTH);
            (seeded_matrix(width, opts.seed.unwrap_or(DEFAULT_SEED)), width)
        }
    };

    println!("Padding {}x{} -> {}x{}", width, width, width + 2, width + 2);
    println!(
        "Engine: max_burst_beats={} scratch={:?}",
        engine.max_burst_beats, engine.scratch
    );
    println!(
        "Bus: request_wait={} read_latency={} beat_gap={} write_response={}",
        timing.request_wait_cycles,
        timing.read_latency_cycles,
        timing.beat_gap_cycles,
        timing.write_response_cycles
    );

    let run = run_padding(&input, width, engine, timing)?;

    if opts.dump {
        println!();
        println!("Source");
        println!("======");
        print!("{}", run.format_source());
        println!();
        println!("Padded output");
        println!("=============");
        print!("{}", run.format_output());
    }

    print_summary(&run);

    match &run.outcome {
        RunOutcome::Pass => Ok(()),
        RunOutcome::Mismatch { index, expected, actual } => {
            let padded = width + 2;
            bail!(
                "output ({}, {}) is {} but reflect padding gives {}",
                index / padded,
                index % padded,
                actual,
                expected
            )
        }
        RunOutcome::Failed(e) => bail!("transfer failed: {}", e),
    }
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut opts = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--width" | "-w" => {
                let value = next_value(&mut iter, arg)?;
                opts.width = Some(value.parse().with_context(|| format!("invalid width {:?}", value))?);
            }
            "--seed" | "-s" => {
                let value = next_value(&mut iter, arg)?;
                opts.seed = Some(value.parse().with_context(|| format!("invalid seed {:?}", value))?);
            }
            "--input" | "-i" => opts.input = Some(next_value(&mut iter, arg)?.to_string()),
            "--config" | "-c" => opts.config = Some(next_value(&mut iter, arg)?.to_string()),
            "--dump" => opts.dump = true,
            "--sample-config" => opts.sample_config = true,
            "--help" | "-h" => opts.help = true,
            other => bail!("unknown argument {:?}\n\n{}", other, USAGE),
        }
    }

    if opts.input.is_some() && opts.seed.is_some() {
        log::warn!("--seed has no effect together with --input");
    }
    Ok(opts)
}

fn next_value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a str> {
    match iter.next() {
        Some(value) => Ok(value.as_str()),
        None => bail!("{} needs a value", flag),
    }
}

/// Read a raw little-endian u32 matrix.
fn read_matrix(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.len() % 4 != 0 {
        bail!("{} is {} bytes, not a whole number of u32 words", path.display(), bytes.len());
    }

    let mut words = vec![0u32; bytes.len() / 4];
    LittleEndian::read_u32_into(&bytes, &mut words);
    Ok(words)
}

/// Width of a square matrix of `words` elements, checked against `requested`.
fn matrix_width(words: usize, requested: Option<usize>) -> Result<usize> {
    match requested {
        Some(width) if width.checked_mul(width) == Some(words) => Ok(width),
        Some(width) => bail!("{} words is not a {}x{} matrix", words, width, width),
        None => {
            let width = (words as f64).sqrt().round() as usize;
            if width * width != words {
                bail!("{} words is not a square matrix", words);
            }
            Ok(width)
        }
    }
}

fn print_summary(run: &PadRun) {
    let stats = &run.engine;

    println!();
    println!("Result: {}", if run.outcome.is_pass() { "PASS" } else { "FAIL" });
    println!("Cycles: {} ({} busy, {} stalled)", run.cycles, stats.busy_cycles, stats.stall_cycles);
    println!(
        "Reads:  {} bursts, {} words, {} source rows",
        stats.read_bursts, stats.words_read, stats.rows_fetched
    );
    println!("Writes: {} bursts, {} words", stats.write_bursts, stats.words_written);

    for name in ["source", "destination"] {
        if let Ok(region) = run.memory.region(name) {
            println!(
                "  {:12} 0x{:08X} {:6} bytes  {} read bursts, {} write bursts",
                region.name, region.base_address, region.size, region.bus_reads, region.bus_writes
            );
        }
    }
    if stats.ignored_starts > 0 {
        println!("Ignored starts: {}", stats.ignored_starts);
    }
}
