//! `/dump`: writes the decoded request (op, spath, attrv, argv,
//! credentials) to stdout as plain text. Useful for inspecting exactly
//! what a client sent.

use std::sync::Arc;

use clap::Parser;
use russ::error::exit;
use russ::{ServiceNode, Server, Session, SvrType};
use russ_demos::{init_logging, DemoArgs};

fn dump(session: &mut Session) {
    let Some(stdout) = session.sconn.fd(russ::cconn::FD_STDOUT) else {
        let _ = session.sconn.fatal("error: no exit status", exit::SYSFAILURE);
        return;
    };
    let creds = session.sconn.creds();
    let mut out = String::new();
    out.push_str(&format!("protocol: {}\n", session.req.protocol_string));
    out.push_str(&format!("op: {} (opnum {})\n", session.req.op, session.req.opnum));
    out.push_str(&format!("spath: {}\n", session.req.spath));
    out.push_str(&format!("effective spath: {}\n", session.spath));
    out.push_str(&format!("attrv: {:?}\n", session.req.attrv));
    out.push_str(&format!("argv: {:?}\n", session.req.argv));
    out.push_str(&format!(
        "peer: pid={} uid={} gid={}\n",
        creds.pid, creds.uid, creds.gid
    ));
    let _ = nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(stdout) }, out.as_bytes());
    let _ = session.sconn.exit(exit::SUCCESS);
}

fn main() -> anyhow::Result<()> {
    let args = DemoArgs::parse();
    init_logging(args.verbose)?;

    let mut root = ServiceNode::root();
    let node = root.add("dump");
    node.autoanswer = true;
    node.handler = Some(Arc::new(dump));

    let server = Server::new(root, SvrType::Fork)
        .announce(&args.saddr, args.mode_bits(), None, None)?
        .set_await_timeout_ms(15_000);

    log::info!("russ-demo-dump listening on {}", args.saddr.display());
    server.run()?;
    Ok(())
}
