//! `/echo`: copies stdin to stdout until EOF, then exits SUCCESS.
//! End-to-end scenario 1 in spec.md §8.

use std::sync::Arc;

use clap::Parser;
use russ::error::exit;
use russ::{DEADLINE_NEVER, ServiceNode, Server, Session, SvrType};
use russ_demos::{init_logging, DemoArgs};

fn echo(session: &mut Session) {
    let Some(stdin) = session.sconn.fd(russ::cconn::FD_STDIN) else {
        let _ = session.sconn.fatal("error: no exit status", exit::SYSFAILURE);
        return;
    };
    let Some(stdout) = session.sconn.take_fd(russ::cconn::FD_STDOUT) else {
        let _ = session.sconn.fatal("error: no exit status", exit::SYSFAILURE);
        return;
    };
    let pair = russ::relay::RelayPair::with_owned_dst(stdin, stdout);
    let _ = russ::relay::relay(vec![pair], None, DEADLINE_NEVER);
    let _ = session.sconn.exit(exit::SUCCESS);
}

fn main() -> anyhow::Result<()> {
    let args = DemoArgs::parse();
    init_logging(args.verbose)?;

    let mut root = ServiceNode::root();
    let echo_node = root.add("echo");
    echo_node.autoanswer = true;
    echo_node.handler = Some(Arc::new(echo));

    let server = Server::new(root, SvrType::Fork)
        .announce(&args.saddr, args.mode_bits(), None, None)?
        .set_await_timeout_ms(15_000);

    log::info!("russ-demo-echo listening on {}", args.saddr.display());
    server.run()?;
    Ok(())
}
