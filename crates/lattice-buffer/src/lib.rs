//! Growable byte buffer with head-cut, rewind and append/take, used by
//! every frame codec in this workspace to accumulate partial reads.

/// An owned byte region with a read cursor.
///
/// `append` grows the backing allocation and copies bytes onto the end;
/// `take`/`cut` advance the cursor from the front. Bytes before the
/// cursor are dead space until `rewind` (called automatically by
/// `append` once the dead space is worth reclaiming) moves the live
/// bytes back to the start of the allocation.
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    cursor: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity), cursor: 0 }
    }

    /// Bytes currently readable (from the cursor to the end).
    pub fn len(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    /// Appends `src` to the end of the readable region. Rewinds first if
    /// the cursor has advanced, so dead space never accumulates forever.
    pub fn append(&mut self, src: &[u8]) {
        if self.cursor > 0 {
            self.rewind();
        }
        self.data.extend_from_slice(src);
    }

    /// Copies up to `dst.len()` bytes out and advances the cursor.
    /// Returns the number of bytes copied.
    pub fn take(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len());
        dst[..n].copy_from_slice(&self.data[self.cursor..self.cursor + n]);
        self.cut(n);
        n
    }

    /// Advances the cursor by `n` bytes (clamped to the available length).
    pub fn cut(&mut self, n: usize) {
        let n = n.min(self.len());
        self.cursor += n;
        flux_utils::safe_assert!(self.cursor <= self.data.len());
        if self.cursor == self.data.len() {
            // Fully drained: reset for free instead of waiting for rewind.
            self.data.clear();
            self.cursor = 0;
        }
    }

    /// Moves the readable region back to the start of the allocation,
    /// discarding the dead space before the cursor.
    pub fn rewind(&mut self) {
        if self.cursor > 0 {
            self.data.drain(..self.cursor);
            self.cursor = 0;
        }
        flux_utils::safe_assert_eq!(self.cursor, 0);
    }

    /// Empties the buffer entirely.
    pub fn reset(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    /// Replaces this buffer's contents with a copy of `other`'s readable
    /// region.
    pub fn copy_from(&mut self, other: &Buffer) {
        self.reset();
        self.append(other.as_slice());
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::Buffer;

    #[test]
    fn append_then_take_round_trips() {
        let mut buf = Buffer::new();
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.len(), 11);

        let mut out = [0u8; 5];
        let n = buf.take(&mut out);
        assert_eq!(n, 5);
        assert_eq!(&out, b"hello");
        assert_eq!(buf.as_slice(), b" world");
    }

    #[test]
    fn cut_advances_cursor_and_reclaims_when_drained() {
        let mut buf = Buffer::new();
        buf.append(b"abcdef");
        buf.cut(3);
        assert_eq!(buf.as_slice(), b"def");
        buf.cut(3);
        assert!(buf.is_empty());
        // fully drained resets the allocation, not just the cursor
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn append_after_partial_cut_rewinds_instead_of_growing_unbounded() {
        let mut buf = Buffer::new();
        buf.append(b"0123456789");
        buf.cut(8);
        assert_eq!(buf.as_slice(), b"89");
        buf.append(b"ab");
        assert_eq!(buf.as_slice(), b"89ab");
    }

    #[test]
    fn buffer_conservation_across_interleaved_append_and_take() {
        let mut buf = Buffer::new();
        let mut taken = Vec::new();
        let appended: Vec<u8> = (0u8..200).collect();

        for chunk in appended.chunks(7) {
            buf.append(chunk);
            let mut out = [0u8; 3];
            let n = buf.take(&mut out);
            taken.extend_from_slice(&out[..n]);
        }
        while !buf.is_empty() {
            let mut out = [0u8; 3];
            let n = buf.take(&mut out);
            taken.extend_from_slice(&out[..n]);
        }

        assert_eq!(taken, appended);
    }
}
