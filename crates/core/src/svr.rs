//! Server: owns a listener and a service tree, loops in FORK or THREAD
//! mode, enforces timeouts and optional user-switching (spec.md §3
//! "Server", §4.5 dispatch, §4.6 server loop).

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{fork, setsid, ForkResult, Gid, Uid};

use crate::cconn;
use crate::codec::Request;
use crate::error::{exit, msg, RussError, Result};
use crate::optable;
use crate::sconn::SConn;
use crate::sess::Session;
use crate::sock::Credentials;
use crate::time;
use crate::tree::{self, ServiceNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvrType {
    Fork,
    Thread,
}

pub struct Server {
    root: ServiceNode,
    svr_type: SvrType,
    lisd: RawFd,
    /// Kept alive only when this server created its own listening socket
    /// via `announce`; an inherited fd (the common case, fd 3 from a
    /// spawner) is owned by the caller instead.
    announced: Option<OwnedFd>,
    /// Filesystem path of the socket this server announced, if any.
    /// Unlinked at teardown (spec.md §5 "Resource discipline"), except
    /// for `closeonaccept` servers (see `impl Drop for Server`); `None`
    /// when the listening fd was inherited rather than created here, in
    /// which case the spawner owns the socket file's lifecycle.
    saddr: Option<PathBuf>,
    accept_timeout_ms: i64,
    await_timeout_ms: i64,
    autoswitchuser: bool,
    allowrootuser: bool,
    matchclientuser: bool,
    closeonaccept: bool,
    help: Option<String>,
}

impl Server {
    pub fn new(root: ServiceNode, svr_type: SvrType) -> Self {
        Server {
            root,
            svr_type,
            lisd: 3,
            announced: None,
            saddr: None,
            accept_timeout_ms: -1,
            await_timeout_ms: 15_000,
            autoswitchuser: false,
            allowrootuser: false,
            matchclientuser: false,
            closeonaccept: false,
            help: None,
        }
    }

    /// Create and bind the listening socket at `path`, replacing whatever
    /// `lisd` this server had (the default inherited fd 3, typically).
    pub fn announce(mut self, path: &Path, mode: u32, uid: Option<u32>, gid: Option<u32>) -> Result<Self> {
        let fd = crate::sock::announce(path, mode, uid, gid)?;
        self.lisd = fd.as_raw_fd();
        self.announced = Some(fd);
        self.saddr = Some(path.to_path_buf());
        Ok(self)
    }

    /// Use an already-open listening fd (the `main:sd` configuration
    /// option, default 3, per spec.md §6's process contract for spawned
    /// server executables).
    pub fn set_lisd(mut self, fd: RawFd) -> Self {
        self.lisd = fd;
        self
    }

    pub fn set_accept_timeout_ms(mut self, ms: i64) -> Self {
        self.accept_timeout_ms = ms;
        self
    }

    pub fn set_await_timeout_ms(mut self, ms: i64) -> Self {
        self.await_timeout_ms = ms;
        self
    }

    pub fn set_autoswitchuser(mut self, v: bool) -> Self {
        self.autoswitchuser = v;
        self
    }

    pub fn set_allowrootuser(mut self, v: bool) -> Self {
        self.allowrootuser = v;
        self
    }

    pub fn set_matchclientuser(mut self, v: bool) -> Self {
        self.matchclientuser = v;
        self
    }

    pub fn set_closeonaccept(mut self, v: bool) -> Self {
        self.closeonaccept = v;
        self
    }

    pub fn set_help(mut self, text: impl Into<String>) -> Self {
        self.help = Some(text.into());
        self
    }

    pub fn root(&self) -> &ServiceNode {
        &self.root
    }

    /// The server-wide help string set by `set_help`, if any. Consulted
    /// by the HELP dispatch fallback (spec.md §4.5 step 4) when neither
    /// the matched node nor the root has a handler of its own to answer
    /// a HELP request.
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Enter the accept loop. Consumes the server: FORK mode never
    /// returns except on listener failure; THREAD mode runs until the
    /// listener closes (e.g. `closeonaccept`).
    pub fn run(self) -> Result<()> {
        // SIGPIPE ignored process-wide so a write to a client that has
        // gone away surfaces as EPIPE instead of killing the server.
        unsafe {
            let _ = signal(Signal::SIGPIPE, SigHandler::SigIgn);
        }

        let closeonaccept = self.closeonaccept;
        let lisd = self.lisd;
        let svr = Arc::new(self);

        loop {
            let deadline = time::to_deadline(svr.accept_timeout_ms);
            let sconn = match SConn::accept(lisd, deadline) {
                Ok(s) => s,
                Err(RussError::Timeout) => {
                    log::trace!("accept timed out, retrying");
                    continue;
                }
                Err(e) => {
                    log::error!("accept failed: {e}");
                    continue;
                }
            };

            if closeonaccept {
                let _ = nix::unistd::close(lisd);
            }

            match svr.svr_type {
                SvrType::Fork => svr.handle_fork(sconn),
                SvrType::Thread => {
                    let svr = Arc::clone(&svr);
                    let handle = std::thread::spawn(move || svr.dispatch(sconn));
                    if closeonaccept {
                        // A single-shot THREAD server returns from `run`
                        // as soon as its one request is fully handled;
                        // otherwise the caller's process could exit (and
                        // take this thread down with it) before the
                        // handler finishes.
                        let _ = handle.join();
                    }
                }
            }

            if closeonaccept {
                return Ok(());
            }
        }
    }

    /// Double-fork a worker for one connection (spec.md §4.6 FORK mode).
    /// The intermediate child daemonizes (setsid, drops the listening
    /// socket) then forks the actual worker and exits immediately so the
    /// original parent's `waitpid` never blocks on the worker itself.
    fn handle_fork(&self, sconn: SConn) {
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child, .. }) => {
                let _ = waitpid(child, None);
            }
            Ok(ForkResult::Child) => {
                let _ = setsid();
                let _ = nix::unistd::close(self.lisd);
                match unsafe { fork() } {
                    Ok(ForkResult::Parent { .. }) => std::process::exit(0),
                    Ok(ForkResult::Child) => {
                        self.dispatch(sconn);
                        std::process::exit(0);
                    }
                    Err(e) => {
                        log::error!("second fork failed: {e}");
                        std::process::exit(exit::SYSFAILURE);
                    }
                }
            }
            Err(e) => {
                log::error!("fork failed: {e}");
            }
        }
    }

    /// Dispatch one accepted connection: decode, walk the tree, run the
    /// op-specific fallbacks, invoke the handler, and apply the
    /// no-exit failsafe. (spec.md §4.5 "Dispatch algorithm".)
    fn dispatch(&self, mut sconn: SConn) {
        let await_deadline = time::to_deadline(self.await_timeout_ms);
        let req = match sconn.await_req(await_deadline) {
            Ok(r) => r,
            Err(e) => {
                let _ = sconn.fatal(&e.to_string(), e.exit_status());
                sconn.close();
                return;
            }
        };

        if self.matchclientuser && !self.client_user_allowed(sconn.creds()) {
            let _ = sconn.fatal(msg::INSUFFICIENT_PRIVILEGE, exit::FAILURE);
            sconn.close();
            return;
        }

        let matched = match tree::find(&self.root, &req.spath) {
            Some(m) if !m.is_unresolved() => m,
            _ => {
                let _ = sconn.fatal(msg::NO_SERVICE, exit::FAILURE);
                sconn.close();
                return;
            }
        };
        let node = matched.node;

        if node.autoanswer {
            if let Err(e) = sconn.answer_standard() {
                log::warn!("autoanswer failed: {e}");
                sconn.close();
                return;
            }
        }

        if req.opnum == optable::HELP && node.handler.is_none() {
            self.handle_help_fallback(&mut sconn, &req);
            sconn.close();
            return;
        }

        if req.opnum == optable::LIST && node.handler.is_none() {
            self.handle_list(&mut sconn, node);
            sconn.close();
            return;
        }

        if node.virtual_ || node.handler.is_some() {
            if self.autoswitchuser {
                if let Err(e) = switch_user(sconn.creds()) {
                    log::warn!("autoswitchuser failed: {e}");
                    let _ = sconn.fatal(msg::NO_SWITCH_USER, exit::SYSFAILURE);
                    sconn.close();
                    return;
                }
            }
            match node.handler.clone() {
                Some(handler) => {
                    let spath = matched.remainder;
                    let mut session = Session {
                        svr: self,
                        sconn: &mut sconn,
                        req: &req,
                        spath,
                    };
                    handler(&mut session);
                }
                None => {
                    // virtual node with no handler of its own: nothing to
                    // invoke, treat like an unresolved match.
                    let _ = sconn.fatal(msg::NO_SERVICE, exit::FAILURE);
                    sconn.close();
                    return;
                }
            }
        } else {
            let _ = sconn.fatal(msg::NO_SERVICE, exit::FAILURE);
            sconn.close();
            return;
        }

        if !sconn.exited() {
            let _ = sconn.fatal(msg::NO_EXIT, exit::SYSFAILURE);
        }
        sconn.close();
    }

    fn client_user_allowed(&self, creds: Credentials) -> bool {
        let own_uid = Uid::current().as_raw();
        creds.uid == own_uid || (self.allowrootuser && creds.uid == 0)
    }

    fn handle_help_fallback(&self, sconn: &mut SConn, req: &Request) {
        let root_handler = self.root.handler.clone();
        if root_handler.is_none() && self.help.is_none() {
            let _ = sconn.fatal(msg::NO_SERVICE, exit::FAILURE);
            return;
        }
        if sconn.sysfd().is_none() {
            if let Err(e) = sconn.answer_standard() {
                log::warn!("answer failed: {e}");
                return;
            }
        }
        match root_handler {
            Some(root_handler) => {
                let mut session = Session {
                    svr: self,
                    sconn,
                    req,
                    spath: req.spath.clone(),
                };
                root_handler(&mut session);
            }
            // No root handler to delegate to, but a server-wide help
            // string was configured: answer with it directly rather
            // than failing the request.
            None => {
                if let Some(fd) = sconn.fd(cconn::FD_STDOUT) {
                    if let Some(help) = &self.help {
                        let _ = nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, help.as_bytes());
                    }
                }
                let _ = sconn.exit(exit::SUCCESS);
            }
        }
    }

    fn handle_list(&self, sconn: &mut SConn, node: &ServiceNode) {
        if sconn.sysfd().is_none() {
            if let Err(e) = sconn.answer_standard() {
                log::warn!("answer failed: {e}");
                return;
            }
        }
        let names = node.child_names_sorted();
        let mut listing = names.join("\n");
        if !names.is_empty() {
            listing.push('\n');
        }
        if let Some(fd) = sconn.fd(cconn::FD_STDOUT) {
            let _ = nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, listing.as_bytes());
        }
        let _ = sconn.exit(exit::SUCCESS);
    }
}

/// Unlinks the announced socket file at teardown (spec.md §5 "Resource
/// discipline"). A forked worker's copy of `self` (see `handle_fork`)
/// never reaches here: it always exits via `std::process::exit`, which
/// skips destructors, so the listening socket the original process is
/// still serving is never unlinked out from under it.
///
/// `closeonaccept` servers are exempt: per spec.md §8, a fork-mode
/// `closeonaccept` server's socket stays on the filesystem after its one
/// accepted request so that later dials fail with `CannotDial`
/// (connection refused), not `NoService` (path gone). The original only
/// closes the listening fd in that case and never unlinks
/// (`pyruss`'s `loop_thread`); unlinking belongs to whoever manages the
/// service's lifecycle afterwards (e.g. `rubb`'s `stop`).
impl Drop for Server {
    fn drop(&mut self) {
        if self.closeonaccept {
            return;
        }
        if let Some(path) = &self.saddr {
            if let Err(e) = crate::sock::unlink(path) {
                log::warn!("failed to unlink {}: {e}", path.display());
            }
        }
    }
}

/// Drop effective uid/gid to the peer's credentials, in gid-then-uid
/// order (dropping uid first would leave us unable to change gid).
fn switch_user(creds: Credentials) -> Result<()> {
    let gid = Gid::from_raw(creds.gid);
    let uid = Uid::from_raw(creds.uid);
    nix::unistd::setresgid(gid, gid, gid).map_err(RussError::from)?;
    nix::unistd::setresuid(uid, uid, uid).map_err(RussError::from)?;
    Ok(())
}
