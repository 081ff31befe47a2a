//! Error taxonomy for the RUSS protocol engine.
//!
//! One enum covers every failure kind named in the protocol spec: malformed
//! inputs, syscall failures, protocol violations, deadline expiry, and the
//! handful of conditions the dispatcher itself raises (no matching service,
//! unsupported operation, access rejected). Binaries built on top of `russ`
//! are expected to wrap this in `anyhow` at their `main`, the same way the
//! teacher's bin crates do.

/// Standard stderr messages written by `fatal()`, verbatim from the protocol
/// spec so that client-side scripts can grep for them reliably.
pub mod msg {
    pub const BAD_ARGS: &str = "error: bad/missing arguments";
    pub const BAD_OP: &str = "error: unsupported operation";
    pub const NO_DIAL: &str = "error: cannot dial service";
    pub const NO_EXIT: &str = "error: no exit status";
    pub const NO_SERVICE: &str = "error: no service";
    pub const NO_SWITCH_USER: &str = "error: cannot switch user";
    pub const NO_LIST: &str = "info: list not available";
    pub const INSUFFICIENT_PRIVILEGE: &str = "error: insufficient privilege";
    pub const UNDEF_SERVICE: &str = "warning: undefined service";
}

/// Process exit codes written to the exit (sysfd) channel.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const EXITFDCLOSED: i32 = 125;
    pub const CALLFAILURE: i32 = 126;
    pub const SYSFAILURE: i32 = 127;
}

/// `cconn::wait` return codes. Distinct from the exit status: a non-`OK`
/// wait kind means the exit status is not meaningful.
pub mod wait {
    pub const OK: i32 = 0;
    pub const UNSET: i32 = 1;
    pub const FAILURE: i32 = -1;
    pub const BADFD: i32 = -2;
    pub const TIMEOUT: i32 = -3;
    pub const HUP: i32 = -4;
}

#[derive(Debug, thiserror::Error)]
pub enum RussError {
    #[error("bad args: {0}")]
    BadArgs(String),

    #[error("cannot announce: {0}")]
    CannotAnnounce(String),

    #[error("cannot dial: {0}")]
    CannotDial(String),

    #[error("bad protocol: {0}")]
    BadProtocol(String),

    #[error("timeout")]
    Timeout,

    #[error("no service")]
    NoService,

    #[error("unsupported operation: {0}")]
    BadOp(String),

    #[error("insufficient privilege")]
    NoAccess,

    #[error("system failure: {0}")]
    SysFailure(String),

    #[error("downstream call failed: {0}")]
    CallFailure(String),

    #[error("exit channel closed before status was written")]
    ExitFdClosed,
}

impl From<std::io::Error> for RussError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            RussError::Timeout
        } else {
            RussError::SysFailure(e.to_string())
        }
    }
}

impl From<nix::Error> for RussError {
    fn from(e: nix::Error) -> Self {
        RussError::SysFailure(e.to_string())
    }
}

impl RussError {
    /// The exit status a `fatal()` call should use when surfacing this
    /// error to a client, per the error taxonomy's exit-code mapping.
    pub fn exit_status(&self) -> i32 {
        match self {
            RussError::CallFailure(_) => exit::CALLFAILURE,
            RussError::SysFailure(_) => exit::SYSFAILURE,
            RussError::ExitFdClosed => exit::EXITFDCLOSED,
            _ => exit::FAILURE,
        }
    }
}

pub type Result<T> = std::result::Result<T, RussError>;
