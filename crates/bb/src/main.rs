//! `rubb`: bulletin-board manager. Installs, starts, stops, lists, and
//! cleans named server configurations under a RUSS bb directory.
//!
//! Grounded on `tools/rubb.py`'s `BB`/`BBServer` classes: a bb directory
//! holds `conf/` (installed `.conf` files), `pids/` (one pidfile per
//! running server, named for the service), and `services/` (the announced
//! saddr for each running server). `start` spawns the configured server
//! binary with its socket pre-announced and handed to it as fd 3, per
//! spec.md §6's "process contract for spawned server executables"; `stop`
//! signals the recorded pid and removes the saddr.

use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use clap::{Parser, Subcommand};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

#[derive(Parser, Debug)]
#[command(about = "Install/start/stop/list/clean RUSS bulletin-board servers")]
struct Cli {
    /// Bulletin-board directory (holds conf/, pids/, services/).
    #[arg(long, default_value = "/var/run/russ/bb/system")]
    bb: PathBuf,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Install a configuration file under a name (default: the filename
    /// minus `.conf`).
    Install {
        conffile: PathBuf,
        newname: Option<String>,
    },
    /// Remove an installed configuration.
    Remove { name: String },
    /// Print an installed configuration.
    Show { name: String },
    /// List installed configuration names.
    List,
    /// Start named servers (default: all installed names).
    Start { names: Vec<String> },
    /// Stop named servers (default: all installed names).
    Stop { names: Vec<String> },
    /// Report running/not-running status of named servers.
    Status {
        #[arg(short = 'l', long)]
        detail: bool,
        names: Vec<String>,
    },
    /// Stop then start named servers.
    Restart { names: Vec<String> },
    /// Stop every installed server and remove all bb working directories.
    Clean,
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = if verbose >= 1 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
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

/// The three working directories a bb manages, plus convenience paths
/// for one server's conf/pid/service files.
struct Bb {
    confdir: PathBuf,
    pidsdir: PathBuf,
    servicesdir: PathBuf,
}

impl Bb {
    fn new(bbdir: &Path) -> Self {
        Bb {
            confdir: bbdir.join("conf"),
            pidsdir: bbdir.join("pids"),
            servicesdir: bbdir.join("services"),
        }
    }

    fn prep(&self) -> anyhow::Result<()> {
        for dir in [&self.confdir, &self.pidsdir, &self.servicesdir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    fn conffile(&self, name: &str) -> PathBuf {
        self.confdir.join(format!("{name}.conf"))
    }

    fn pidfile(&self, name: &str) -> PathBuf {
        self.pidsdir.join(name)
    }

    fn servicefile(&self, name: &str) -> PathBuf {
        self.servicesdir.join(name)
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.confdir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|n| n.strip_suffix(".conf").map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn pid_of(&self, name: &str) -> Option<Pid> {
        std::fs::read_to_string(self.pidfile(name))
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .map(Pid::from_raw)
    }

    fn is_running(&self, name: &str) -> bool {
        match self.pid_of(name) {
            Some(pid) => signal::kill(pid, None).is_ok(),
            None => false,
        }
    }

    fn install(&self, name: &str, text: &str) -> anyhow::Result<()> {
        self.prep()?;
        std::fs::write(self.conffile(name), text)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> anyhow::Result<()> {
        let path = self.conffile(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Spawn the server binary named by `main:path` in the conf file,
    /// with its listening socket pre-announced at `servicefile(name)`
    /// and handed to the child as fd 3 (spec.md §6's process contract).
    fn start(&self, name: &str) -> anyhow::Result<()> {
        let conf_path = self.conffile(name);
        let mut conf = russ_conf::Conf::new();
        conf.read_file(&conf_path)?;
        let bin_path = conf.get("main", "path", "");
        if bin_path.is_empty() {
            anyhow::bail!("conf for {name} has no main:path");
        }

        let saddr = self.servicefile(name);
        let mode = u32::from_str_radix(conf.get("main", "mode", "600"), 8).unwrap_or(0o600);
        let lisd = russ::announce(&saddr, mode, None, None)?;

        let mut cmd = std::process::Command::new(bin_path);
        cmd.arg("-c").arg(format!("main:sd=3"));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let lisd_raw = lisd.as_raw_fd();
        unsafe {
            cmd.pre_exec(move || {
                // Duplicate the announced listener onto fd 3 for the
                // child, matching the inherited-fd convention every
                // russ::Server expects by default.
                if lisd_raw != 3 {
                    nix::unistd::dup2(lisd_raw, 3).map_err(std::io::Error::from)?;
                }
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        std::fs::write(self.pidfile(name), child.id().to_string())?;
        log::info!("started {name} (pid {})", child.id());
        Ok(())
    }

    fn stop(&self, name: &str) -> anyhow::Result<()> {
        if let Some(pid) = self.pid_of(name) {
            let _ = signal::kill(pid, Signal::SIGHUP);
        }
        let _ = std::fs::remove_file(self.pidfile(name));
        let _ = std::fs::remove_file(self.servicefile(name));
        Ok(())
    }

    fn clean(&self) -> anyhow::Result<()> {
        for dir in [&self.confdir, &self.pidsdir, &self.servicesdir] {
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let bb = Bb::new(&cli.bb);

    match cli.cmd {
        Cmd::Install { conffile, newname } => {
            let name = newname.unwrap_or_else(|| {
                conffile
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "unnamed".to_string())
            });
            let text = std::fs::read_to_string(&conffile)?;
            bb.install(&name, &text)?;
            log::info!("installed {name} from {}", conffile.display());
        }
        Cmd::Remove { name } => bb.remove(&name)?,
        Cmd::Show { name } => {
            print!("{}", std::fs::read_to_string(bb.conffile(&name))?);
        }
        Cmd::List => {
            let names = bb.names();
            if !names.is_empty() {
                println!("{}", names.join(" "));
            }
        }
        Cmd::Start { names } => {
            let names = if names.is_empty() { bb.names() } else { names };
            for name in names {
                if bb.is_running(&name) {
                    log::warn!("server ({name}) already running");
                    continue;
                }
                if let Err(e) = bb.start(&name) {
                    log::error!("failed to start {name}: {e}");
                }
            }
        }
        Cmd::Stop { names } => {
            let names = if names.is_empty() { bb.names() } else { names };
            for name in names {
                bb.stop(&name)?;
                println!("bb={}:name={name}:running=false", cli.bb.display());
            }
        }
        Cmd::Restart { names } => {
            let names = if names.is_empty() { bb.names() } else { names };
            for name in &names {
                bb.stop(name)?;
            }
            for name in &names {
                if let Err(e) = bb.start(name) {
                    log::error!("failed to start {name}: {e}");
                }
            }
        }
        Cmd::Status { detail, names } => {
            let names = if names.is_empty() { bb.names() } else { names };
            for name in names {
                let running = bb.is_running(&name);
                if detail {
                    let pid = bb.pid_of(&name).map(|p| p.as_raw()).unwrap_or(-1);
                    println!(
                        "bb={}:name={name}:running={running}:pid={pid}:conffile={}",
                        cli.bb.display(),
                        bb.conffile(&name).display()
                    );
                } else {
                    println!("bb={}:name={name}:running={running}", cli.bb.display());
                }
            }
        }
        Cmd::Clean => {
            for name in bb.names() {
                bb.stop(&name)?;
            }
            bb.clean()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_names_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let bb = Bb::new(dir.path());

        bb.install("echo", "[main]\npath = /bin/echo\n").unwrap();
        assert_eq!(bb.names(), vec!["echo".to_string()]);
        assert!(bb.conffile("echo").exists());

        bb.install("daytime", "[main]\npath = /bin/date\n").unwrap();
        assert_eq!(bb.names(), vec!["daytime".to_string(), "echo".to_string()]);

        bb.remove("echo").unwrap();
        assert_eq!(bb.names(), vec!["daytime".to_string()]);
    }

    #[test]
    fn not_running_without_a_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let bb = Bb::new(dir.path());
        bb.prep().unwrap();
        assert!(!bb.is_running("nothing"));
    }

    #[test]
    fn stop_removes_pidfile_and_servicefile() {
        let dir = tempfile::tempdir().unwrap();
        let bb = Bb::new(dir.path());
        bb.prep().unwrap();
        std::fs::write(bb.pidfile("x"), "1").unwrap();
        std::fs::write(bb.servicefile("x"), "").unwrap();

        bb.stop("x").unwrap();

        assert!(!bb.pidfile("x").exists());
        assert!(!bb.servicefile("x").exists());
    }
}
