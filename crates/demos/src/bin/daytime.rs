//! `/daytime`: writes the current local time as one line to stdout, then
//! exits SUCCESS. End-to-end scenario 2 in spec.md §8.

use std::sync::Arc;

use clap::Parser;
use russ::error::exit;
use russ::{ServiceNode, Server, Session, SvrType};
use russ_demos::{init_logging, DemoArgs};

fn daytime(session: &mut Session) {
    let Some(stdout) = session.sconn.fd(russ::cconn::FD_STDOUT) else {
        let _ = session.sconn.fatal("error: no exit status", exit::SYSFAILURE);
        return;
    };
    let line = format!("{}\n", chrono::Local::now().to_rfc2822());
    let _ = nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(stdout) }, line.as_bytes());
    let _ = session.sconn.exit(exit::SUCCESS);
}

fn main() -> anyhow::Result<()> {
    let args = DemoArgs::parse();
    init_logging(args.verbose)?;

    let mut root = ServiceNode::root();
    let node = root.add("daytime");
    node.autoanswer = true;
    node.handler = Some(Arc::new(daytime));

    let server = Server::new(root, SvrType::Fork)
        .announce(&args.saddr, args.mode_bits(), None, None)?
        .set_await_timeout_ms(15_000);

    log::info!("russ-demo-daytime listening on {}", args.saddr.display());
    server.run()?;
    Ok(())
}
