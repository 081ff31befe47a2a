//! `rurun`: dial several RUSS services concurrently and aggregate their
//! exit statuses.
//!
//! Grounded on `tools/rurun.py`, simplified from its pnet/target-range
//! machinery to the shape described for this workspace: a flat job list
//! (name -> saddr/spath/args), each dialled with a shared deadline, each
//! job's captured stdout/stderr printed with a `[name]` prefix once it
//! completes, and a final exit status of the worst (first non-zero)
//! status across all jobs.

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use clap::Parser;
use russ::error::wait;

#[derive(Parser, Debug)]
#[command(about = "Dial several RUSS services concurrently and aggregate exit statuses")]
struct Cli {
    /// Job list file: one `[name]` section per job with `saddr`, `spath`,
    /// and optional `args` (space-separated) options.
    jobs: PathBuf,

    /// Shared deadline for every job, in milliseconds (0 = no deadline).
    #[arg(short = 't', long, default_value_t = 0)]
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

struct Job {
    name: String,
    saddr: PathBuf,
    spath: String,
    args: Vec<String>,
}

struct JobResult {
    name: String,
    kind: i32,
    status: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn load_jobs(path: &std::path::Path) -> anyhow::Result<Vec<Job>> {
    let mut conf = russ_conf::Conf::new();
    conf.read_file(path)?;
    let mut jobs = Vec::new();
    for name in conf.sections() {
        let saddr = conf.get(name, "saddr", "");
        if saddr.is_empty() {
            anyhow::bail!("job [{name}] is missing a saddr");
        }
        let spath = conf.get(name, "spath", "/").to_string();
        let args: Vec<String> = conf
            .get(name, "args", "")
            .split_whitespace()
            .map(str::to_string)
            .collect();
        jobs.push(Job {
            name: name.to_string(),
            saddr: PathBuf::from(saddr),
            spath,
            args,
        });
    }
    Ok(jobs)
}

fn run_job(job: Job, deadline: russ::Deadline) -> JobResult {
    let result = russ::dialv_wait_inouterr(
        &job.saddr,
        deadline,
        "execute",
        &job.spath,
        Vec::new(),
        job.args,
        b"",
        russ::STDOUT_SIZE_DEFAULT,
        russ::STDERR_SIZE_DEFAULT,
    );
    match result {
        Ok((kind, status, stdout, stderr)) => JobResult {
            name: job.name,
            kind,
            status,
            stdout,
            stderr,
        },
        Err(e) => {
            log::error!("job {} failed to dial: {e}", job.name);
            JobResult {
                name: job.name,
                kind: wait::FAILURE,
                status: 1,
                stdout: Vec::new(),
                stderr: e.to_string().into_bytes(),
            }
        }
    }
}

fn print_prefixed(name: &str, stream: &mut dyn std::io::Write, bytes: &[u8]) {
    for line in bytes.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        let _ = writeln!(stream, "[{name}] {}", String::from_utf8_lossy(line));
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let jobs = load_jobs(&cli.jobs)?;
    if jobs.is_empty() {
        anyhow::bail!("no jobs in {}", cli.jobs.display());
    }
    let deadline = russ::to_deadline(cli.timeout_ms);

    let (tx, rx) = mpsc::channel();
    let njobs = jobs.len();
    for job in jobs {
        let tx = tx.clone();
        thread::spawn(move || {
            let result = run_job(job, deadline);
            let _ = tx.send(result);
        });
    }
    drop(tx);

    let mut worst_status = 0i32;
    let mut any_failed = false;
    for result in rx.iter().take(njobs) {
        print_prefixed(&result.name, &mut std::io::stdout(), &result.stdout);
        print_prefixed(&result.name, &mut std::io::stderr(), &result.stderr);

        if result.kind != wait::OK {
            log::warn!("job {} returned non-OK wait kind {}", result.name, result.kind);
            any_failed = true;
        } else if result.status != 0 {
            worst_status = result.status;
        }
    }

    if any_failed && worst_status == 0 {
        worst_status = 1;
    }
    std::process::exit(worst_status);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_jobs_reads_saddr_spath_and_args() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.conf");
        std::fs::write(
            &path,
            "[echo]\nsaddr = /tmp/echo.sock\nspath = /echo\nargs = one two\n\n\
             [daytime]\nsaddr = /tmp/daytime.sock\n",
        )
        .unwrap();

        let jobs = load_jobs(&path).unwrap();
        assert_eq!(jobs.len(), 2);
        let echo = jobs.iter().find(|j| j.name == "echo").unwrap();
        assert_eq!(echo.saddr, PathBuf::from("/tmp/echo.sock"));
        assert_eq!(echo.spath, "/echo");
        assert_eq!(echo.args, vec!["one".to_string(), "two".to_string()]);

        let daytime = jobs.iter().find(|j| j.name == "daytime").unwrap();
        assert_eq!(daytime.spath, "/"); // default when unset
        assert!(daytime.args.is_empty());
    }

    #[test]
    fn load_jobs_rejects_missing_saddr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.conf");
        std::fs::write(&path, "[broken]\nspath = /x\n").unwrap();
        assert!(load_jobs(&path).is_err());
    }
}
