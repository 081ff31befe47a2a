//! Request wire codec (protocol v"0010", spec.md §4.1 / §6).
//!
//! Frame layout, in order: 4-byte protocol tag; operation string; spath;
//! attrv (N strings then an empty-string sentinel); argv (M strings then
//! an empty-string sentinel). Every string is a 4-byte big-endian length
//! followed by that many bytes.

use std::io::{Read, Write};

use crate::error::{RussError, Result};
use crate::optable::{self, OpNum};

pub const PROTOCOL_STRING: &str = "0010";
pub const SPATH_MAX: usize = 8192;
pub const VEC_MAX: usize = 1024;

/// Ceiling on any single string's length, independent of the vector
/// bounds above: guards against a corrupt or hostile length prefix
/// causing an unbounded allocation before the spath/vector checks run.
const STRING_MAX: u32 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub protocol_string: String,
    pub op: String,
    pub opnum: OpNum,
    pub spath: String,
    pub attrv: Vec<String>,
    pub argv: Vec<String>,
}

impl Request {
    pub fn new(op: impl Into<String>, spath: impl Into<String>) -> Self {
        let op = op.into();
        let opnum = optable::find_opnum(&op);
        Request {
            protocol_string: PROTOCOL_STRING.to_string(),
            op,
            opnum,
            spath: spath.into(),
            attrv: Vec::new(),
            argv: Vec::new(),
        }
    }

    pub fn with_attrv(mut self, attrv: Vec<String>) -> Self {
        self.attrv = attrv;
        self
    }

    pub fn with_argv(mut self, argv: Vec<String>) -> Self {
        self.argv = argv;
        self
    }

    /// Split an attribute of the form `KEY=VALUE` on its first `=`.
    /// Attributes without an `=` yield an empty value, matching
    /// `pyruss`'s `Request.get_attrs`.
    pub fn attrs(&self) -> Vec<(String, String)> {
        self.attrv
            .iter()
            .map(|a| match a.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (a.clone(), String::new()),
            })
            .collect()
    }
}

fn write_string(w: &mut impl Write, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| RussError::BadArgs(format!("string too long: {} bytes", bytes.len())))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)
        .map_err(|e| truncated_or(e, "string length"))?;
    let len = u32::from_be_bytes(len_buf);
    if len > STRING_MAX {
        return Err(RussError::BadArgs(format!("string length {len} exceeds limit")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)
        .map_err(|e| truncated_or(e, "string body"))?;
    String::from_utf8(buf).map_err(|e| RussError::BadProtocol(format!("non-utf8 string: {e}")))
}

fn truncated_or(e: std::io::Error, what: &str) -> RussError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        RussError::BadProtocol(format!("truncated frame reading {what}"))
    } else {
        RussError::from(e)
    }
}

fn write_vec(w: &mut impl Write, v: &[String]) -> Result<()> {
    for s in v {
        write_string(w, s)?;
    }
    write_string(w, "")
}

fn read_vec(r: &mut impl Read, max: usize, what: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    loop {
        let s = read_string(r)?;
        if s.is_empty() {
            break;
        }
        if out.len() >= max {
            return Err(RussError::BadArgs(format!("{what} exceeds {max} entries")));
        }
        out.push(s);
    }
    Ok(out)
}

pub fn encode(req: &Request, w: &mut impl Write) -> Result<()> {
    if req.protocol_string.as_bytes().len() != 4 {
        return Err(RussError::BadArgs("protocol tag must be 4 bytes".into()));
    }
    w.write_all(req.protocol_string.as_bytes())?;
    write_string(w, &req.op)?;
    if req.spath.len() > SPATH_MAX {
        return Err(RussError::BadArgs(format!("spath exceeds {SPATH_MAX} bytes")));
    }
    write_string(w, &req.spath)?;
    if req.attrv.len() > VEC_MAX {
        return Err(RussError::BadArgs(format!("attrv exceeds {VEC_MAX} entries")));
    }
    write_vec(w, &req.attrv)?;
    if req.argv.len() > VEC_MAX {
        return Err(RussError::BadArgs(format!("argv exceeds {VEC_MAX} entries")));
    }
    write_vec(w, &req.argv)
}

pub fn decode(r: &mut impl Read) -> Result<Request> {
    let mut tag = [0u8; 4];
    r.read_exact(&mut tag).map_err(|e| truncated_or(e, "protocol tag"))?;
    let protocol_string = String::from_utf8_lossy(&tag).into_owned();
    if protocol_string != PROTOCOL_STRING {
        return Err(RussError::BadProtocol(format!(
            "unsupported protocol tag {protocol_string:?}"
        )));
    }
    let op = read_string(r)?;
    let opnum = optable::find_opnum(&op);
    let spath = read_string(r)?;
    if spath.len() > SPATH_MAX {
        return Err(RussError::BadArgs(format!("spath exceeds {SPATH_MAX} bytes")));
    }
    let attrv = read_vec(r, VEC_MAX, "attrv")?;
    let argv = read_vec(r, VEC_MAX, "argv")?;
    Ok(Request {
        protocol_string,
        op,
        opnum,
        spath,
        attrv,
        argv,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Request {
        Request::new("execute", "/a/b")
            .with_attrv(vec!["FOO=bar".into()])
            .with_argv(vec!["one".into(), "two".into()])
    }

    #[test]
    fn round_trips() {
        let req = sample();
        let mut buf = Vec::new();
        encode(&req, &mut buf).unwrap();
        let decoded = decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn bad_protocol_tag_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"0009");
        write_string(&mut buf, "execute").unwrap();
        write_string(&mut buf, "/").unwrap();
        write_string(&mut buf, "").unwrap();
        write_string(&mut buf, "").unwrap();
        let err = decode(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, RussError::BadProtocol(_)));
    }

    #[test]
    fn oversized_spath_is_bad_args() {
        let req = Request::new("execute", "/".repeat(SPATH_MAX + 1));
        let mut buf = Vec::new();
        let err = encode(&req, &mut buf).unwrap_err();
        assert!(matches!(err, RussError::BadArgs(_)));
    }

    #[test]
    fn truncated_frame_is_bad_protocol() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"0010");
        let err = decode(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, RussError::BadProtocol(_)));
    }

    #[test]
    fn oversized_argv_rejected_on_decode() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"0010");
        write_string(&mut buf, "execute").unwrap();
        write_string(&mut buf, "/").unwrap();
        write_string(&mut buf, "").unwrap();
        for i in 0..(VEC_MAX + 1) {
            write_string(&mut buf, &i.to_string()).unwrap();
        }
        write_string(&mut buf, "").unwrap();
        let err = decode(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, RussError::BadArgs(_)));
    }

    #[test]
    fn attrs_split_on_first_equals() {
        let req = Request::new("execute", "/").with_attrv(vec!["A=b=c".into(), "solo".into()]);
        let attrs = req.attrs();
        assert_eq!(attrs[0], ("A".to_string(), "b=c".to_string()));
        assert_eq!(attrs[1], ("solo".to_string(), "".to_string()));
    }
}
