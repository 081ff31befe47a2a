//! Bidirectional fd relay (spec.md §4.7): copy bytes between fd pairs
//! until the sysfd signals exit, every source hits EOF, or the deadline
//! expires.

use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};

use nix::poll::{PollFd, PollFlags};

use crate::error::{wait, RussError, Result};
use crate::time::{self, Deadline};

const CHUNK: usize = 64 * 1024;

/// Block until `fd` is readable or `deadline` passes. Used by `accept`,
/// `await_req`, and the relay's own poll loop.
pub fn wait_readable(fd: RawFd, deadline: Deadline) -> Result<()> {
    if time::is_expired(deadline) {
        return Err(RussError::Timeout);
    }
    let mut fds = [PollFd::new(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN)];
    let n = nix::poll::poll(&mut fds, time::poll_timeout(deadline))
        .map_err(|e| RussError::SysFailure(format!("poll: {e}")))?;
    if n == 0 {
        return Err(RussError::Timeout);
    }
    Ok(())
}

/// One `(source, destination)` fd pair being relayed. `done` once `src`
/// has hit EOF and the trailing bytes have been flushed to `dst`.
///
/// `owned_dst` is `Some` only when the relay itself was handed ownership
/// of the destination end (via [`RelayPair::with_owned_dst`]); only then
/// does EOF on `src` close `dst`. A destination the caller still holds
/// by some other means (a real stdout/stderr fd, or an owned fd some
/// other struct will close later) is left alone, since closing it here
/// would race that other owner's eventual close of the same fd number.
pub struct RelayPair {
    src: RawFd,
    dst: RawFd,
    owned_dst: Option<OwnedFd>,
    done: bool,
}

impl RelayPair {
    /// Relay `src` into `dst` without ever closing `dst`.
    pub fn new(src: RawFd, dst: RawFd) -> Self {
        RelayPair { src, dst, owned_dst: None, done: false }
    }

    /// Relay `src` into `dst`, taking ownership of `dst` so the relay
    /// can close it on EOF (the half-close in spec.md §4.7) without a
    /// second owner closing the same fd number again afterwards.
    pub fn with_owned_dst(src: RawFd, dst: OwnedFd) -> Self {
        let raw = dst.as_raw_fd();
        RelayPair { src, dst: raw, owned_dst: Some(dst), done: false }
    }
}

/// Relay bytes between each pair concurrently (via `poll`, not threads —
/// a single relay call already serves one connection) until `sysfd`
/// becomes readable, every pair is done, or `deadline` expires. Returns
/// a wait-kind code from `error::wait`.
pub fn relay(pairs: Vec<RelayPair>, sysfd: Option<RawFd>, deadline: Deadline) -> Result<i32> {
    let mut pairs = pairs;
    let mut buf = vec![0u8; CHUNK];

    loop {
        if pairs.iter().all(|p| p.done) {
            return Ok(wait::OK);
        }
        if time::is_expired(deadline) {
            log::debug!("relay: deadline expired with {} pair(s) unfinished", pairs.iter().filter(|p| !p.done).count());
            return Ok(wait::TIMEOUT);
        }

        // index 0 in `slots` maps to `sysfd` (if present); the rest map to
        // `pairs` by position, skipping already-finished pairs.
        let mut pollfds = Vec::with_capacity(pairs.len() + 1);
        let mut slots: Vec<Option<usize>> = Vec::with_capacity(pairs.len() + 1);
        if let Some(fd) = sysfd {
            pollfds.push(PollFd::new(
                unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
                PollFlags::POLLIN,
            ));
            slots.push(None);
        }
        for (i, p) in pairs.iter().enumerate() {
            if !p.done {
                pollfds.push(PollFd::new(
                    unsafe { std::os::fd::BorrowedFd::borrow_raw(p.src) },
                    PollFlags::POLLIN,
                ));
                slots.push(Some(i));
            }
        }

        let n = nix::poll::poll(&mut pollfds, time::poll_timeout(deadline))
            .map_err(|e| RussError::SysFailure(format!("poll: {e}")))?;
        if n == 0 {
            log::debug!("relay: poll timed out before deadline check, treating as expired");
            return Ok(wait::TIMEOUT);
        }

        if sysfd.is_some() {
            let revents = pollfds[0].revents().unwrap_or(PollFlags::empty());
            if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
                log::trace!("relay: sysfd readable, short-circuiting remaining pairs");
                drain_once(&mut pairs, &mut buf);
                return Ok(wait::OK);
            }
        }

        for (slot, pf) in slots.iter().zip(pollfds.iter()) {
            let Some(pair_idx) = slot else { continue };
            let revents = pf.revents().unwrap_or(PollFlags::empty());
            if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
                copy_available(&mut pairs[*pair_idx], &mut buf)?;
            }
        }
    }
}

fn drain_once(pairs: &mut [RelayPair], buf: &mut [u8]) {
    for p in pairs.iter_mut() {
        if !p.done {
            let _ = copy_available(p, buf);
        }
    }
}

fn copy_available(pair: &mut RelayPair, buf: &mut [u8]) -> Result<()> {
    match nix::unistd::read(unsafe { BorrowedFd::borrow_raw(pair.src) }, buf) {
        Ok(0) => {
            // Drop our owned copy of dst, if we have one: this is the
            // only closing of dst this relay is allowed to do.
            pair.owned_dst.take();
            pair.done = true;
        }
        Ok(n) => {
            if nix::unistd::write(unsafe { BorrowedFd::borrow_raw(pair.dst) }, &buf[..n]).is_err() {
                pair.done = true;
            }
        }
        Err(nix::errno::Errno::EAGAIN) | Err(nix::errno::Errno::EINTR) => {}
        Err(_) => {
            pair.done = true;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn relay_copies_until_eof() {
        let (in_r, mut in_w) = nix::unistd::pipe().unwrap();
        let (out_r, out_w) = nix::unistd::pipe().unwrap();

        in_w.write_all(b"hello").unwrap();
        drop(in_w);

        let deadline = time::to_deadline(2_000);
        let pair = RelayPair::with_owned_dst(in_r.as_raw_fd(), out_w);
        let kind = relay(vec![pair], None, deadline).unwrap();
        assert_eq!(kind, wait::OK);

        let mut got = Vec::new();
        std::fs::File::from(out_r).read_to_end(&mut got).unwrap();
        assert_eq!(got, b"hello");
    }
}
