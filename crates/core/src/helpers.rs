//! Convenience "dial-and-wait" entry points (spec.md §2 item 12, §4.7).
//! Grounded on `pyruss/base.py`'s `dialv_wait`/`dialv_wait_inouterr` and
//! their buffer-size defaults.

use std::path::Path;

use crate::buf::Buf;
use crate::cconn::{self, FD_STDERR, FD_STDIN, FD_STDOUT};
use crate::error::Result;
use crate::time::{self, Deadline};

/// Default captured-stdout capacity for `dialv_wait_inouterr`, taken
/// verbatim from `pyruss.base.STDOUT_SIZE_DEFAULT`.
pub const STDOUT_SIZE_DEFAULT: usize = 1 << 20;
/// Default captured-stderr capacity, from `pyruss.base.STDERR_SIZE_DEFAULT`.
pub const STDERR_SIZE_DEFAULT: usize = 1 << 18;

/// Dial, then wait for the exit status. Does not touch stdin/stdout/
/// stderr at all: callers that need the streams relayed should dial
/// directly and drive `relay` themselves (see `rudial`), or use
/// `dialv_wait_inouterr` for the buffered variant.
pub fn dialv_wait(
    saddr: &Path,
    deadline: Deadline,
    op: &str,
    spath: &str,
    attrv: Vec<String>,
    argv: Vec<String>,
) -> Result<(i32, i32)> {
    let mut conn = cconn::dial(saddr, deadline, op, spath, attrv, argv)?;
    let result = conn.wait(deadline);
    conn.close();
    result
}

/// Dial, feed `stdin` in, capture stdout/stderr up to `stdout_cap`/
/// `stderr_cap` bytes, and wait for the exit status. Mirrors
/// `pyruss.base.dialv_wait_inouterr`.
pub fn dialv_wait_inouterr(
    saddr: &Path,
    deadline: Deadline,
    op: &str,
    spath: &str,
    attrv: Vec<String>,
    argv: Vec<String>,
    stdin: &[u8],
    stdout_cap: usize,
    stderr_cap: usize,
) -> Result<(i32, i32, Vec<u8>, Vec<u8>)> {
    let mut conn = cconn::dial(saddr, deadline, op, spath, attrv, argv)?;

    if let Some(stdin_fd) = conn.fd(FD_STDIN) {
        let mut written = 0usize;
        while written < stdin.len() {
            match nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(stdin_fd) }, &stdin[written..]) {
                Ok(n) => written += n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }
    // Close our end of stdin so the service sees EOF once we're done
    // writing, regardless of how much of `stdin` actually made it across.
    conn.take_fd(FD_STDIN);

    let mut stdout_buf = Buf::new(stdout_cap);
    let mut stderr_buf = Buf::new(stderr_cap);

    if let (Some(stdout_fd), Some(stderr_fd)) = (conn.fd(FD_STDOUT), conn.fd(FD_STDERR)) {
        capture_both(stdout_fd, &mut stdout_buf, stderr_fd, &mut stderr_buf, deadline);
    }

    let (kind, status) = conn.wait(deadline)?;
    conn.close();

    Ok((kind, status, stdout_buf.into_vec(), stderr_buf.into_vec()))
}

/// Drain `stdout_fd`/`stderr_fd` concurrently into their buffers via
/// `poll`, until both hit EOF (or fill), or the deadline expires.
/// Draining the two streams serially would deadlock: a handler that
/// writes enough interleaved output to fill one pipe before closing it
/// would block forever waiting for a reader that hasn't started yet.
fn capture_both(
    stdout_fd: std::os::fd::RawFd,
    stdout_buf: &mut Buf,
    stderr_fd: std::os::fd::RawFd,
    stderr_buf: &mut Buf,
    deadline: Deadline,
) {
    use nix::poll::{PollFd, PollFlags};
    use std::os::fd::BorrowedFd;

    let mut chunk = [0u8; 4096];
    let mut out_done = stdout_buf.is_full();
    let mut err_done = stderr_buf.is_full();

    loop {
        if out_done && err_done {
            return;
        }
        if time::is_expired(deadline) {
            return;
        }

        let mut fds = Vec::with_capacity(2);
        let mut slots = Vec::with_capacity(2);
        if !out_done {
            fds.push(PollFd::new(
                unsafe { BorrowedFd::borrow_raw(stdout_fd) },
                PollFlags::POLLIN,
            ));
            slots.push(0u8);
        }
        if !err_done {
            fds.push(PollFd::new(
                unsafe { BorrowedFd::borrow_raw(stderr_fd) },
                PollFlags::POLLIN,
            ));
            slots.push(1u8);
        }

        let n = match nix::poll::poll(&mut fds, time::poll_timeout(deadline)) {
            Ok(n) => n,
            Err(_) => return,
        };
        if n == 0 {
            return;
        }

        for (slot, pf) in slots.iter().zip(fds.iter()) {
            let revents = pf.revents().unwrap_or(PollFlags::empty());
            if !revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
                continue;
            }
            let (fd, buf, done) = if *slot == 0 {
                (stdout_fd, &mut *stdout_buf, &mut out_done)
            } else {
                (stderr_fd, &mut *stderr_buf, &mut err_done)
            };
            match nix::unistd::read(unsafe { BorrowedFd::borrow_raw(fd) }, &mut chunk) {
                Ok(0) => *done = true,
                Ok(n) => {
                    buf.write(&chunk[..n]);
                    if buf.is_full() {
                        *done = true;
                    }
                }
                Err(nix::errno::Errno::EINTR) | Err(nix::errno::Errno::EAGAIN) => {}
                Err(_) => *done = true,
            }
        }
    }
}
