//! UNIX socket plumbing: announce/dial_socket and the SCM_RIGHTS fd-passing
//! primitives that sit underneath `cconn::dial` and `sconn::answer`.
//!
//! Grounded on `nix::sys::socket`'s `sendmsg`/`recvmsg`/`ControlMessage`
//! usage as shown in the `py-hotstart` hsserver and `trybotster` broker
//! reference sources: a single in-band byte alongside one `ScmRights`
//! ancillary message per fd handoff.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::cmsg_space;
use nix::sys::socket::{
    accept4, bind, connect, getsockopt, listen, recvmsg, sendmsg, socket, sockopt, AddressFamily,
    Backlog, ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockType, UnixAddr,
};
use nix::unistd::{chown, Gid, Uid};

use crate::error::{RussError, Result};
use crate::time::{self, Deadline};

/// Peer credentials read once at accept time (spec.md §3 "Credentials").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// Create the listening socket for a service address: unlink any stale
/// socket file, bind, chmod/chown, listen. Mirrors `russ_announce`.
pub fn announce(path: &Path, mode: u32, uid: Option<u32>, gid: Option<u32>) -> Result<OwnedFd> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(RussError::CannotAnnounce(format!("unlink stale socket: {e}"))),
    }

    let fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| RussError::CannotAnnounce(format!("socket: {e}")))?;

    let addr = UnixAddr::new(path).map_err(|e| RussError::CannotAnnounce(format!("bad saddr: {e}")))?;
    bind(fd.as_raw_fd(), &addr).map_err(|e| RussError::CannotAnnounce(format!("bind: {e}")))?;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| RussError::CannotAnnounce(format!("chmod: {e}")))?;

    if uid.is_some() || gid.is_some() {
        chown(path, uid.map(Uid::from_raw), gid.map(Gid::from_raw))
            .map_err(|e| RussError::CannotAnnounce(format!("chown: {e}")))?;
    }

    listen(&fd, Backlog::new(128).unwrap_or(Backlog::MAXCONN))
        .map_err(|e| RussError::CannotAnnounce(format!("listen: {e}")))?;

    Ok(fd)
}

/// Remove the socket file at `path` from the filesystem. Mirrors
/// `russ_unlink` (`pyruss.base.unlink`): teardown's counterpart to
/// `announce`, called once a server that created its own listening
/// socket is done serving it. Missing files are not an error.
pub fn unlink(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RussError::CannotAnnounce(format!("unlink: {e}"))),
    }
}

/// Connect to `saddr` with a timeout derived from the remaining deadline
/// budget. Maps common connect failures onto the kind-tagged errors
/// spec.md §4.2 asks for.
pub fn dial_socket(saddr: &Path, deadline: Deadline) -> Result<OwnedFd> {
    if time::is_expired(deadline) {
        return Err(RussError::Timeout);
    }

    let fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| RussError::CannotDial(format!("socket: {e}")))?;

    let addr = UnixAddr::new(saddr).map_err(|e| RussError::CannotDial(format!("bad saddr: {e}")))?;

    match connect(fd.as_raw_fd(), &addr) {
        Ok(()) => Ok(fd),
        Err(nix::errno::Errno::ENOENT) => Err(RussError::NoService),
        Err(nix::errno::Errno::ECONNREFUSED) => {
            Err(RussError::CannotDial("connection refused".into()))
        }
        Err(nix::errno::Errno::EACCES) | Err(nix::errno::Errno::EPERM) => {
            Err(RussError::CannotDial("permission denied".into()))
        }
        Err(e) => Err(RussError::CannotDial(e.to_string())),
    }
}

/// Accept one connection on `lisd`, bounded by `deadline`. Returns the
/// connected fd; does not read credentials or the connection-event byte
/// (that is `sconn::accept`'s job, once credentials are available).
pub fn accept_one(lisd: RawFd, deadline: Deadline) -> Result<OwnedFd> {
    if time::is_expired(deadline) {
        return Err(RussError::Timeout);
    }
    crate::relay::wait_readable(lisd, deadline)?;
    let raw = accept4(lisd, SockFlag::SOCK_CLOEXEC)
        .map_err(|e| RussError::SysFailure(format!("accept: {e}")))?;
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Read SO_PEERCRED off an already-accepted socket.
pub fn peer_credentials(fd: RawFd) -> Result<Credentials> {
    let creds = getsockopt(&unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, sockopt::PeerCredentials)
        .map_err(|e| RussError::SysFailure(format!("getsockopt(SO_PEERCRED): {e}")))?;
    Ok(Credentials {
        pid: creds.pid(),
        uid: creds.uid(),
        gid: creds.gid(),
    })
}

/// Send `fds` as a single SCM_RIGHTS ancillary message, with `byte` as the
/// one-byte in-band payload (the fd count, by convention).
pub fn send_fds(sock_fd: RawFd, fds: &[RawFd], byte: u8) -> Result<()> {
    let payload = [byte];
    let iov = [IoSlice::new(&payload)];
    let cmsg = [ControlMessage::ScmRights(fds)];
    sendmsg::<()>(sock_fd, &iov, &cmsg, MsgFlags::empty(), None)
        .map_err(|e| RussError::SysFailure(format!("sendmsg(SCM_RIGHTS): {e}")))?;
    Ok(())
}

/// Receive one SCM_RIGHTS ancillary message carrying up to `max_fds` fds.
/// Returns the in-band byte and the received fds, in the order the kernel
/// delivered them.
pub fn recv_fds(sock_fd: RawFd, max_fds: usize) -> Result<(u8, Vec<OwnedFd>)> {
    let mut cmsg_buffer = cmsg_space!([RawFd; 32]);
    let mut payload = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut payload)];
    let msg = recvmsg::<()>(
        sock_fd,
        &mut iov,
        Some(&mut cmsg_buffer),
        MsgFlags::empty(),
    )
    .map_err(|e| RussError::SysFailure(format!("recvmsg: {e}")))?;

    if msg.bytes == 0 {
        return Err(RussError::BadProtocol("connection closed before fd handoff".into()));
    }

    let mut fds = Vec::new();
    for cmsg in msg
        .cmsgs()
        .map_err(|e| RussError::SysFailure(format!("malformed ancillary data: {e}")))?
    {
        if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
            for raw in raw_fds {
                fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
            }
        }
    }

    if fds.len() > max_fds {
        return Err(RussError::BadProtocol(format!(
            "received {} fds, expected at most {max_fds}",
            fds.len()
        )));
    }

    Ok((payload[0], fds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{socketpair, SockFlag, SockType};
    use std::io::Write;

    #[test]
    fn send_and_recv_fds_round_trip() {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .unwrap();

        // An fd to pass across: a pipe's read end.
        let (pr, mut pw) = nix::unistd::pipe().unwrap();
        pw.write_all(b"hi").unwrap();
        drop(pw);

        send_fds(a.as_raw_fd(), &[pr.as_raw_fd()], 1).unwrap();
        drop(pr);

        let (byte, fds) = recv_fds(b.as_raw_fd(), 4).unwrap();
        assert_eq!(byte, 1);
        assert_eq!(fds.len(), 1);

        let mut buf = [0u8; 2];
        let n = nix::unistd::read(&fds[0], &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
    }
}
