//! Shared plumbing for the `russ-demos` example services: logging setup
//! and the small CLI every demo shares (saddr, mode, verbosity).
//!
//! The demos themselves are plain `russ::Server` hosts, one per binary.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// Filesystem path of the listening socket to create.
    #[arg(long, default_value = "/tmp/russ-demo.sock")]
    pub saddr: PathBuf,

    /// Socket file mode (octal).
    #[arg(long, default_value = "0600")]
    pub mode: String,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl DemoArgs {
    pub fn mode_bits(&self) -> u32 {
        u32::from_str_radix(self.mode.trim_start_matches("0o"), 8).unwrap_or(0o600)
    }
}

/// Colored, leveled logging to stdout: one `fern::Dispatch`, chrono
/// timestamps, level from `-v`/`RUSS_LOG`.
pub fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match std::env::var("RUSS_LOG").ok().as_deref() {
        Some("trace") => log::LevelFilter::Trace,
        Some("debug") => log::LevelFilter::Debug,
        Some("warn") => log::LevelFilter::Warn,
        Some("error") => log::LevelFilter::Error,
        Some("info") => log::LevelFilter::Info,
        _ if verbose >= 2 => log::LevelFilter::Trace,
        _ if verbose == 1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Info,
    };

    let colors = fern::colors::ColoredLevelConfig::new()
        .info(fern::colors::Color::Green)
        .warn(fern::colors::Color::Yellow)
        .error(fern::colors::Color::Red)
        .debug(fern::colors::Color::Blue)
        .trace(fern::colors::Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}
