//! `rudial-bm`: dial the same spath N times and report latency
//! statistics. Grounded on `tools/rudial-bm.py`.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Benchmark repeated dials of a RUSS service")]
struct Cli {
    saddr: PathBuf,

    #[arg(default_value = "/")]
    spath: String,

    #[arg(short = 'o', long, default_value = "execute")]
    op: String,

    /// Number of dials to perform.
    #[arg(short = 'n', long, default_value_t = 100)]
    count: usize,

    /// Per-dial deadline in milliseconds.
    #[arg(short = 't', long, default_value_t = 5_000)]
    timeout_ms: i64,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = if verbose >= 1 { log::LevelFilter::Debug } else { log::LevelFilter::Warn };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

/// min/max/mean/p50/p95 of a set of latencies, reported in milliseconds.
struct Stats {
    min: f64,
    max: f64,
    mean: f64,
    p50: f64,
    p95: f64,
}

fn stats(mut samples: Vec<f64>) -> Stats {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = samples.len();
    let percentile = |p: f64| -> f64 {
        if n == 0 {
            return 0.0;
        }
        let idx = ((p * (n as f64 - 1.0)).round() as usize).min(n - 1);
        samples[idx]
    };
    let sum: f64 = samples.iter().sum();
    Stats {
        min: samples.first().copied().unwrap_or(0.0),
        max: samples.last().copied().unwrap_or(0.0),
        mean: if n > 0 { sum / n as f64 } else { 0.0 },
        p50: percentile(0.50),
        p95: percentile(0.95),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut latencies_ms = Vec::with_capacity(cli.count);
    let mut failures = 0usize;

    for i in 0..cli.count {
        let deadline = russ::to_deadline(cli.timeout_ms);
        let start = Instant::now();
        match russ::dialv_wait(&cli.saddr, deadline, &cli.op, &cli.spath, Vec::new(), Vec::new()) {
            Ok((kind, _status)) if kind == russ::error::wait::OK => {
                latencies_ms.push(start.elapsed().as_secs_f64() * 1000.0);
            }
            Ok((kind, _)) => {
                log::warn!("dial {i} returned non-OK wait kind {kind}");
                failures += 1;
            }
            Err(e) => {
                log::warn!("dial {i} failed: {e}");
                failures += 1;
            }
        }
    }

    let s = stats(latencies_ms);
    println!("dials: {} ok, {} failed", cli.count - failures, failures);
    println!(
        "latency ms: min={:.3} p50={:.3} p95={:.3} max={:.3} mean={:.3}",
        s.min, s.p50, s.p95, s.max, s.mean
    );

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_of_empty_samples_are_zero() {
        let s = stats(Vec::new());
        assert_eq!(s.min, 0.0);
        assert_eq!(s.max, 0.0);
        assert_eq!(s.mean, 0.0);
    }

    #[test]
    fn stats_percentiles_on_sorted_input() {
        let s = stats(vec![10.0, 1.0, 5.0, 2.0, 8.0]);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 10.0);
        assert_eq!(s.mean, 5.2);
        assert_eq!(s.p50, 5.0);
    }
}
