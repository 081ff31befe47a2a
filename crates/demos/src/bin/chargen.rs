//! `/chargen`: RFC 864-style character generator. Streams rotating
//! 72-column lines of printable ASCII to stdout until the client closes
//! its end (write fails) or a safety cap is hit, then exits SUCCESS.

use std::sync::Arc;

use clap::Parser;
use russ::error::exit;
use russ::{ServiceNode, Server, Session, SvrType};
use russ_demos::{init_logging, DemoArgs};

const LINE_WIDTH: usize = 72;
const MAX_LINES: usize = 10_000;

fn chargen_line(offset: usize) -> String {
    (0..LINE_WIDTH)
        .map(|i| (b' ' + ((offset + i) % 95) as u8) as char)
        .collect()
}

fn chargen(session: &mut Session) {
    let Some(stdout) = session.sconn.fd(russ::cconn::FD_STDOUT) else {
        let _ = session.sconn.fatal("error: no exit status", exit::SYSFAILURE);
        return;
    };
    for offset in 0..MAX_LINES {
        let line = format!("{}\n", chargen_line(offset));
        if nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(stdout) }, line.as_bytes()).is_err() {
            break;
        }
    }
    let _ = session.sconn.exit(exit::SUCCESS);
}

fn main() -> anyhow::Result<()> {
    let args = DemoArgs::parse();
    init_logging(args.verbose)?;

    let mut root = ServiceNode::root();
    let node = root.add("chargen");
    node.autoanswer = true;
    node.handler = Some(Arc::new(chargen));

    let server = Server::new(root, SvrType::Fork)
        .announce(&args.saddr, args.mode_bits(), None, None)?
        .set_await_timeout_ms(15_000);

    log::info!("russ-demo-chargen listening on {}", args.saddr.display());
    server.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_is_printable_ascii_of_the_right_width() {
        let line = chargen_line(0);
        assert_eq!(line.len(), LINE_WIDTH);
        assert!(line.bytes().all(|b| (b' '..=b'~').contains(&b)));
    }

    #[test]
    fn line_rotates_with_offset() {
        assert_ne!(chargen_line(0), chargen_line(1));
        assert_eq!(chargen_line(0), chargen_line(95));
    }
}
