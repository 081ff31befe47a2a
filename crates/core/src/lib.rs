//! `russ`: protocol engine and server runtime for Reliable UNIX-domain
//! Socket Services.
//!
//! A service is identified by a filesystem path (the *saddr*) and,
//! within that service, a hierarchical path (the *spath*). Clients dial
//! a service with an operation, attributes, arguments and a deadline;
//! servers authenticate the caller via `SO_PEERCRED`, route the request
//! through a service tree, and hand off stdin/stdout/stderr plus an exit
//! channel to the client via `SCM_RIGHTS`.
//!
//! This crate only emits [`log`] records; it never installs a logging
//! backend. Binaries that host a `Server` are expected to do that (see
//! `russ-demos` for the pattern this workspace follows).

pub mod buf;
pub mod cconn;
pub mod codec;
pub mod error;
pub mod helpers;
pub mod optable;
pub mod relay;
pub mod sconn;
pub mod sess;
pub mod sock;
pub mod svr;
pub mod time;
pub mod tree;

pub use cconn::{dial, CConn};
pub use codec::Request;
pub use error::{RussError, Result};
pub use helpers::{dialv_wait, dialv_wait_inouterr, STDERR_SIZE_DEFAULT, STDOUT_SIZE_DEFAULT};
pub use sconn::SConn;
pub use sess::Session;
pub use sock::{announce, unlink, Credentials};
pub use svr::{Server, SvrType};
pub use time::{to_deadline, Deadline, DEADLINE_NEVER};
pub use tree::{HandlerFn, ServiceNode};
