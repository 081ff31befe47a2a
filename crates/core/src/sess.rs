//! Session (spec.md §3 "Session"): the per-request value passed to a
//! service handler.

use crate::codec::Request;
use crate::sconn::SConn;
use crate::svr::Server;

pub struct Session<'a> {
    pub svr: &'a Server,
    pub sconn: &'a mut SConn,
    pub req: &'a Request,
    /// The remainder of the request's spath after the dispatcher consumed
    /// the matched prefix: empty for an exact leaf match, the unconsumed
    /// tail for a virtual-node match.
    pub spath: String,
}
