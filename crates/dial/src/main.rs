//! `rudial`: the thinnest possible RUSS client — connect, relay real
//! stdio to the dialled fds, wait for the exit status, exit with it.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Dial a RUSS service and relay stdio")]
struct Cli {
    /// Service address (socket path) to dial.
    saddr: PathBuf,

    /// Service path within the server.
    #[arg(default_value = "/")]
    spath: String,

    /// Operation to request.
    #[arg(short = 'o', long, default_value = "execute")]
    op: String,

    /// Attribute, as KEY=VALUE. Repeatable.
    #[arg(short = 'a', long = "attr")]
    attrs: Vec<String>,

    /// Deadline in milliseconds (0 = no deadline).
    #[arg(short = 't', long, default_value_t = 0)]
    timeout_ms: i64,

    /// Increase log verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Arguments passed through to the service.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
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

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let deadline = russ::to_deadline(cli.timeout_ms);
    let mut conn = russ::dial(&cli.saddr, deadline, &cli.op, &cli.spath, cli.attrs.clone(), cli.args.clone())?;

    let mut pairs = Vec::new();
    if let Some(fd) = conn.take_fd(russ::cconn::FD_STDIN) {
        pairs.push(russ::relay::RelayPair::with_owned_dst(0, fd));
    }
    if let Some(fd) = conn.fd(russ::cconn::FD_STDOUT) {
        pairs.push(russ::relay::RelayPair::new(fd, 1));
    }
    if let Some(fd) = conn.fd(russ::cconn::FD_STDERR) {
        pairs.push(russ::relay::RelayPair::new(fd, 2));
    }

    let sysfd = conn.sysfd();
    let _ = russ::relay::relay(pairs, sysfd, deadline);

    let (kind, status) = conn.wait(deadline)?;
    conn.close();

    if kind != russ::error::wait::OK {
        log::warn!("wait returned non-OK kind {kind}");
        std::process::exit(russ::error::exit::SYSFAILURE);
    }
    std::process::exit(status);
}
