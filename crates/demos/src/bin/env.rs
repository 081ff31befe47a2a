//! `/env`: writes the server process's environment, one `KEY=VALUE` per
//! line, sorted by key. A debugging aid for checking what an
//! `autoswitchuser`/forked worker actually inherits.

use std::sync::Arc;

use clap::Parser;
use russ::error::exit;
use russ::{ServiceNode, Server, Session, SvrType};
use russ_demos::{init_logging, DemoArgs};

fn env(session: &mut Session) {
    let Some(stdout) = session.sconn.fd(russ::cconn::FD_STDOUT) else {
        let _ = session.sconn.fatal("error: no exit status", exit::SYSFAILURE);
        return;
    };
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = String::new();
    for (k, v) in vars {
        out.push_str(&k);
        out.push('=');
        out.push_str(&v);
        out.push('\n');
    }
    let _ = nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(stdout) }, out.as_bytes());
    let _ = session.sconn.exit(exit::SUCCESS);
}

fn main() -> anyhow::Result<()> {
    let args = DemoArgs::parse();
    init_logging(args.verbose)?;

    let mut root = ServiceNode::root();
    let node = root.add("env");
    node.autoanswer = true;
    node.handler = Some(Arc::new(env));

    let server = Server::new(root, SvrType::Fork)
        .announce(&args.saddr, args.mode_bits(), None, None)?
        .set_await_timeout_ms(15_000);

    log::info!("russ-demo-env listening on {}", args.saddr.display());
    server.run()?;
    Ok(())
}
