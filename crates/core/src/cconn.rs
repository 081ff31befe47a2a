//! Client connection (`cconn`): `dial` and `wait` (spec.md §4.3).

use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;

use crate::codec::{self, Request};
use crate::error::{wait, RussError, Result};
use crate::relay;
use crate::sock;
use crate::time::{self, Deadline};

pub const NFDS: usize = 32;
pub const STD_NFDS: usize = 4;
pub const FD_STDIN: usize = 0;
pub const FD_STDOUT: usize = 1;
pub const FD_STDERR: usize = 2;

/// Client-side handle to a dialled service: up to `NFDS` user fds (the
/// standard case populates indices 0–2) and one exit-channel sysfd.
pub struct CConn {
    fds: [Option<OwnedFd>; NFDS],
    sysfd: Option<OwnedFd>,
}

impl CConn {
    pub fn fd(&self, i: usize) -> Option<RawFd> {
        self.fds[i].as_ref().map(|f| f.as_raw_fd())
    }

    pub fn take_fd(&mut self, i: usize) -> Option<OwnedFd> {
        self.fds[i].take()
    }

    pub fn sysfd(&self) -> Option<RawFd> {
        self.sysfd.as_ref().map(|f| f.as_raw_fd())
    }

    pub fn take_sysfd(&mut self) -> Option<OwnedFd> {
        self.sysfd.take()
    }

    /// Close every fd this connection owns. Idempotent: already-taken
    /// slots are simply skipped.
    pub fn close(&mut self) {
        for slot in self.fds.iter_mut() {
            *slot = None;
        }
        self.sysfd = None;
    }

    /// Read the 4-byte little-endian exit status from the sysfd
    /// (spec.md §4.3 `wait`). The sysfd stays open across a `TIMEOUT`
    /// result so the caller may retry with a fresh deadline.
    pub fn wait(&mut self, deadline: Deadline) -> Result<(i32, i32)> {
        let Some(sysfd) = self.sysfd.as_ref() else {
            return Ok((wait::BADFD, 0));
        };
        match relay::wait_readable(sysfd.as_raw_fd(), deadline) {
            Ok(()) => {}
            Err(RussError::Timeout) => return Ok((wait::TIMEOUT, 0)),
            Err(e) => return Err(e),
        }

        let mut buf = [0u8; 4];
        let raw = sysfd.as_raw_fd();
        let mut nread = 0usize;
        while nread < 4 {
            match nix::unistd::read(unsafe { std::os::fd::BorrowedFd::borrow_raw(raw) }, &mut buf[nread..]) {
                Ok(0) => return Ok((wait::HUP, 0)),
                Ok(n) => nread += n,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(nix::errno::Errno::EAGAIN) => {
                    relay::wait_readable(raw, deadline)?;
                }
                Err(e) => return Err(RussError::SysFailure(e.to_string())),
            }
        }
        let status = i32::from_le_bytes(buf);
        Ok((wait::OK, status))
    }
}

/// Dial a service (spec.md §4.3): connect, exchange the connection-event
/// byte, send the request, receive the fd quadruple, close the original
/// socket.
pub fn dial(
    saddr: &Path,
    deadline: Deadline,
    op: &str,
    spath: &str,
    attrv: Vec<String>,
    argv: Vec<String>,
) -> Result<CConn> {
    let sock_fd = sock::dial_socket(saddr, deadline)?;

    // Connection-event byte: client writes, server reads it during accept
    // to confirm the peer is live before spending time on decode.
    nix::unistd::write(&sock_fd, &[0u8])
        .map_err(|e| RussError::CannotDial(format!("connection event: {e}")))?;

    let req = Request::new(op, spath).with_attrv(attrv).with_argv(argv);
    {
        let mut writer = FdWriter(sock_fd.as_raw_fd());
        codec::encode(&req, &mut writer)?;
    }

    let (count, mut fds) = sock::recv_fds(sock_fd.as_raw_fd(), STD_NFDS)?;
    if count as usize != STD_NFDS || fds.len() != STD_NFDS {
        return Err(RussError::BadProtocol(format!(
            "expected {STD_NFDS} fds, got count={count} len={}",
            fds.len()
        )));
    }

    drop(sock_fd);

    let sysfd = fds.pop();
    let stderr = fds.pop();
    let stdout = fds.pop();
    let stdin = fds.pop();

    let mut cconn_fds: [Option<OwnedFd>; NFDS] = std::array::from_fn(|_| None);
    cconn_fds[FD_STDIN] = stdin;
    cconn_fds[FD_STDOUT] = stdout;
    cconn_fds[FD_STDERR] = stderr;

    Ok(CConn {
        fds: cconn_fds,
        sysfd,
    })
}

/// Minimal `io::Write` over a raw fd, used only long enough to encode one
/// request; avoids taking ownership via `UnixStream` before the fd
/// handoff is confirmed.
struct FdWriter(RawFd);

impl Write for FdWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(self.0) }, buf)
            .map_err(std::io::Error::from)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cconn_has_no_fds() {
        let c = CConn {
            fds: std::array::from_fn(|_| None),
            sysfd: None,
        };
        assert_eq!(c.fd(FD_STDIN), None);
        assert_eq!(c.sysfd(), None);
    }
}
