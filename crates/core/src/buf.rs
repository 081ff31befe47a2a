//! Capacity-bounded byte buffer used to capture stdout/stderr for the
//! in-memory dial helpers (`dialv_wait_inouterr`) and to feed stdin without
//! requiring the caller to own a real fd.

/// A growable buffer up to a fixed capacity. Writes past capacity are
/// truncated rather than erroring: the caller asked for at most `cap`
/// bytes of captured output and silently dropping the remainder matches
/// `russ_buf`'s fixed-allocation behaviour in the original C API.
#[derive(Debug, Clone)]
pub struct Buf {
    data: Vec<u8>,
    cap: usize,
    off: usize,
}

impl Buf {
    pub fn new(cap: usize) -> Self {
        Buf {
            data: Vec::with_capacity(cap.min(1 << 20)),
            cap,
            off: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Bytes currently held, excluding any already-consumed prefix.
    pub fn len(&self) -> usize {
        self.data.len() - self.off
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.off..]
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        if self.off > 0 {
            self.data.drain(0..self.off);
        }
        self.data
    }

    /// Append as much of `bytes` as still fits under `cap`. Returns the
    /// number of bytes actually accepted.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let held = self.data.len() - self.off;
        let room = self.cap.saturating_sub(held);
        let n = bytes.len().min(room);
        self.data.extend_from_slice(&bytes[..n]);
        n
    }

    pub fn remaining_capacity(&self) -> usize {
        self.cap.saturating_sub(self.len())
    }

    pub fn is_full(&self) -> bool {
        self.remaining_capacity() == 0
    }

    /// Mark `n` bytes at the front as consumed (used when this `Buf` is
    /// acting as a source, e.g. feeding stdin to a relay in chunks).
    pub fn consume(&mut self, n: usize) {
        self.off = (self.off + n).min(self.data.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_truncates_at_capacity() {
        let mut b = Buf::new(4);
        assert_eq!(b.write(b"hello"), 4);
        assert_eq!(b.as_bytes(), b"hell");
        assert!(b.is_full());
    }

    #[test]
    fn consume_advances_offset() {
        let mut b = Buf::new(16);
        b.write(b"hello world");
        b.consume(6);
        assert_eq!(b.as_bytes(), b"world");
    }
}
