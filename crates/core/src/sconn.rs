//! Server connection (`sconn`): accept/await_req/answer/exit/fatal/splice
//! (spec.md §4.4).

use std::io::Write as _;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::unistd::pipe;

use crate::cconn::{CConn, FD_STDERR, FD_STDIN, FD_STDOUT};
use crate::codec::{self, Request};
use crate::error::{RussError, Result};
use crate::relay;
use crate::sock::{self, Credentials};
use crate::time::Deadline;

pub const NFDS: usize = 32;

pub struct SConn {
    sd: Option<OwnedFd>,
    creds: Credentials,
    fds: [Option<OwnedFd>; NFDS],
    sysfd: Option<OwnedFd>,
    exited: bool,
}

impl SConn {
    pub fn creds(&self) -> Credentials {
        self.creds
    }

    pub fn fd(&self, i: usize) -> Option<RawFd> {
        self.fds[i].as_ref().map(|f| f.as_raw_fd())
    }

    /// Take ownership of one of the standard fd slots, e.g. to hand it
    /// to `relay` as an owned destination. The slot is left empty; a
    /// later `close` will not touch it again.
    pub fn take_fd(&mut self, i: usize) -> Option<OwnedFd> {
        self.fds[i].take()
    }

    pub fn sysfd(&self) -> Option<RawFd> {
        self.sysfd.as_ref().map(|f| f.as_raw_fd())
    }

    /// True once `exit` has been called (successfully or as a no-op
    /// repeat), used by the dispatcher's no-exit failsafe.
    pub fn exited(&self) -> bool {
        self.exited
    }

    /// Accept a connection on `lisd`: read peer credentials immediately
    /// (they must be available before decode, per the ordering guarantee
    /// in spec.md §5), then consume the one-byte connection event.
    pub fn accept(lisd: RawFd, deadline: Deadline) -> Result<SConn> {
        let accepted = sock::accept_one(lisd, deadline)?;
        let creds = sock::peer_credentials(accepted.as_raw_fd())?;

        let mut event = [0u8; 1];
        loop {
            match nix::unistd::read(unsafe { std::os::fd::BorrowedFd::borrow_raw(accepted.as_raw_fd()) }, &mut event) {
                Ok(1) => break,
                Ok(0) => return Err(RussError::BadProtocol("peer closed before connection event".into())),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(nix::errno::Errno::EAGAIN) => {
                    relay::wait_readable(accepted.as_raw_fd(), deadline)?;
                }
                Ok(_) | Err(_) => return Err(RussError::BadProtocol("malformed connection event".into())),
            }
        }

        Ok(SConn {
            sd: Some(accepted),
            creds,
            fds: std::array::from_fn(|_| None),
            sysfd: None,
            exited: false,
        })
    }

    /// Decode exactly one request from `sd`, bounded by `deadline`.
    pub fn await_req(&self, deadline: Deadline) -> Result<Request> {
        let sd = self.sd.as_ref().ok_or_else(|| RussError::SysFailure("sconn has no sd".into()))?;
        relay::wait_readable(sd.as_raw_fd(), deadline)?;
        let mut reader = FdReader(sd.as_raw_fd());
        codec::decode(&mut reader)
    }

    /// Standard 3-pipe answer: creates stdin/stdout/stderr pipes plus the
    /// exit sysfd pipe, sends the client-side ends over `sd`, and keeps
    /// the server-side ends. Mirrors `answer(3, nil)`.
    pub fn answer_standard(&mut self) -> Result<()> {
        let (stdin_r, stdin_w) = pipe().map_err(RussError::from)?;
        let (stdout_r, stdout_w) = pipe().map_err(RussError::from)?;
        let (stderr_r, stderr_w) = pipe().map_err(RussError::from)?;
        let (exit_r, exit_w) = pipe().map_err(RussError::from)?;

        self.send_and_store(
            [stdin_w.as_raw_fd(), stdout_r.as_raw_fd(), stderr_r.as_raw_fd()],
            exit_r.as_raw_fd(),
            [Some(stdin_r), Some(stdout_w), Some(stderr_w)],
            Some(exit_w),
        )?;

        // The client-side ends were sent via SCM_RIGHTS (the kernel made
        // its own copies); close our copies now that the handoff is done.
        Ok(())
    }

    /// Answer using caller-supplied client-side fds instead of fresh
    /// pipes (used by `splice`/`redial_and_splice` to hand a downstream
    /// connection's fds straight to the upstream client).
    fn send_and_store(
        &mut self,
        client_fds: [RawFd; 3],
        client_sysfd: RawFd,
        server_fds: [Option<OwnedFd>; 3],
        server_sysfd: Option<OwnedFd>,
    ) -> Result<()> {
        let sd = self.sd.take().ok_or_else(|| RussError::SysFailure("sconn has no sd".into()))?;

        let to_send = [client_fds[0], client_fds[1], client_fds[2], client_sysfd];
        sock::send_fds(sd.as_raw_fd(), &to_send, to_send.len() as u8)?;

        let [a, b, c] = server_fds;
        self.fds[FD_STDIN] = a;
        self.fds[FD_STDOUT] = b;
        self.fds[FD_STDERR] = c;
        self.sysfd = server_sysfd;

        // sd is dropped here, closing the original connected socket.
        drop(sd);
        Ok(())
    }

    /// Write the little-endian exit status to the sysfd and close it.
    /// Idempotent: a second call is a no-op.
    pub fn exit(&mut self, status: i32) -> Result<()> {
        if self.exited {
            return Ok(());
        }
        if let Some(sysfd) = self.sysfd.take() {
            let bytes = status.to_le_bytes();
            let mut written = 0usize;
            while written < 4 {
                match nix::unistd::write(&sysfd, &bytes[written..]) {
                    Ok(n) => written += n,
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(e) => return Err(RussError::SysFailure(e.to_string())),
                }
            }
        }
        self.exited = true;
        Ok(())
    }

    /// Write `text` + newline to stderr if still open, then `exit(status)`.
    /// The failsafe the dispatcher uses when a handler misbehaves, and
    /// the dispatcher's own response when it rejects a request before
    /// ever invoking a handler (no service, permission denied, ...). In
    /// the latter case nothing has answered yet, so answer now: the
    /// client has already sent its request and is waiting on the fd
    /// handoff, and the only way for it to observe this failure is over
    /// the standard stderr/exit channels rather than a bare EOF.
    pub fn fatal(&mut self, text: &str, status: i32) -> Result<()> {
        if self.sysfd.is_none() && self.sd.is_some() {
            let _ = self.answer_standard();
        }
        if let Some(stderr) = self.fds[FD_STDERR].take() {
            let mut f = std::fs::File::from(stderr);
            let _ = writeln!(f, "{text}");
        }
        self.exit(status)
    }

    /// Move a downstream `cconn`'s fds onto this sconn's client-facing
    /// slots, completing the "answer" to the upstream client with the
    /// downstream service's fds instead of fresh pipes. After this call
    /// `cconn` is inert (all its fds have been taken).
    pub fn splice(&mut self, mut cconn: CConn) -> Result<()> {
        let stdin = cconn.take_fd(FD_STDIN).ok_or_else(|| RussError::CallFailure("downstream missing stdin".into()))?;
        let stdout = cconn.take_fd(FD_STDOUT).ok_or_else(|| RussError::CallFailure("downstream missing stdout".into()))?;
        let stderr = cconn.take_fd(FD_STDERR).ok_or_else(|| RussError::CallFailure("downstream missing stderr".into()))?;
        let sysfd = cconn.take_sysfd().ok_or_else(|| RussError::CallFailure("downstream missing sysfd".into()))?;

        self.send_and_store(
            [stdin.as_raw_fd(), stdout.as_raw_fd(), stderr.as_raw_fd()],
            sysfd.as_raw_fd(),
            [None, None, None],
            None,
        )?;

        // The fds we just sent belong to the kernel's SCM_RIGHTS copy now;
        // this sconn doesn't hold server-side ends for a spliced
        // connection (the downstream service itself holds those), so drop
        // our copies once the send has completed.
        drop(stdin);
        drop(stdout);
        drop(stderr);
        drop(sysfd);
        cconn.close();
        self.exited = true; // the downstream service owns exit signalling now
        Ok(())
    }

    /// Dial `req.spath` downstream and splice the result onto this sconn:
    /// the atomic combination proxy-style services use (spec.md §4.4).
    pub fn redial_and_splice(&mut self, saddr: &Path, deadline: Deadline, req: &Request) -> Result<()> {
        let cconn = crate::cconn::dial(
            saddr,
            deadline,
            &req.op,
            &req.spath,
            req.attrv.clone(),
            req.argv.clone(),
        )
        .map_err(|e| RussError::CallFailure(e.to_string()))?;
        self.splice(cconn)
    }

    pub fn close(&mut self) {
        for slot in self.fds.iter_mut() {
            *slot = None;
        }
        self.sysfd = None;
        self.sd = None;
    }
}

struct FdReader(RawFd);

impl std::io::Read for FdReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        nix::unistd::read(unsafe { std::os::fd::BorrowedFd::borrow_raw(self.0) }, buf).map_err(std::io::Error::from)
    }
}
