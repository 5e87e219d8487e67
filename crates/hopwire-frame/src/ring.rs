use bytes::{Bytes, BytesMut};

use crate::codec::DELIMITER;

/// Growable circular byte buffer for delimiter-framed input.
///
/// Holds bytes that have been read from a stream but not yet handed out as
/// frames. Three cursors describe the content:
///
/// - `oldest`: start of unconsumed data, `None` when the buffer is empty
/// - `free_start`: where the next read lands
/// - `scanned`: how many unconsumed bytes (counted from `oldest`) are known
///   not to contain a delimiter
///
/// `oldest` is `None` exactly when there are no unconsumed bytes, so
/// `oldest == Some(free_start)` means the buffer is full. The capacity only
/// ever grows; growing keeps byte order and moves the unconsumed span to
/// offset 0.
#[derive(Debug)]
pub struct RingBuffer {
    storage: Vec<u8>,
    oldest: Option<usize>,
    free_start: usize,
    scanned: usize,
}

impl RingBuffer {
    /// Create an empty buffer. A zero capacity is bumped to one byte.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity.max(1)],
            oldest: None,
            free_start: 0,
            scanned: 0,
        }
    }

    /// Current backing storage size.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        match self.oldest {
            None => 0,
            Some(oldest) if self.free_start > oldest => self.free_start - oldest,
            Some(oldest) => self.capacity() - oldest + self.free_start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.oldest.is_none()
    }

    /// True when there is no room for another read.
    pub fn is_full(&self) -> bool {
        self.oldest == Some(self.free_start)
    }

    /// Contiguous free space starting at the write cursor.
    ///
    /// Empty only when the buffer is full. Fill some prefix of it and then
    /// call [`RingBuffer::commit`] with the number of bytes written.
    pub fn writable(&mut self) -> &mut [u8] {
        match self.oldest {
            None => {
                self.free_start = 0;
                self.scanned = 0;
                &mut self.storage[..]
            }
            Some(oldest) if self.free_start > oldest => &mut self.storage[self.free_start..],
            Some(oldest) => &mut self.storage[self.free_start..oldest],
        }
    }

    /// Mark `n` bytes at the start of [`RingBuffer::writable`] as filled.
    pub fn commit(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        debug_assert!(n <= self.capacity() - self.len(), "commit past free space");
        if self.oldest.is_none() {
            self.oldest = Some(self.free_start);
        }
        self.free_start = (self.free_start + n) % self.capacity();
    }

    /// Append bytes, growing as needed.
    pub fn extend_from_slice(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.is_full() {
                self.grow();
            }
            let free = self.writable();
            let n = free.len().min(data.len());
            free[..n].copy_from_slice(&data[..n]);
            self.commit(n);
            data = &data[n..];
        }
    }

    /// Take the next complete frame, without its delimiter.
    ///
    /// Scanning resumes where the previous call stopped, so bytes are looked
    /// at once no matter how many partial reads they arrived in. The frame is
    /// assembled in `scratch` (at most two copies when it wraps) and split
    /// off from it.
    pub fn next_frame(&mut self, scratch: &mut BytesMut) -> Option<Bytes> {
        let oldest = self.oldest?;
        let len = self.len();
        let capacity = self.capacity();

        while self.scanned < len {
            let start = (oldest + self.scanned) % capacity;
            let end = if start < self.free_start {
                self.free_start
            } else {
                capacity
            };
            match self.storage[start..end].iter().position(|&b| b == DELIMITER) {
                Some(pos) => {
                    let frame_len = self.scanned + pos;
                    return Some(self.consume(oldest, frame_len, len, scratch));
                }
                None => self.scanned += end - start,
            }
        }

        None
    }

    /// Double the capacity.
    pub fn grow(&mut self) {
        let target = self.capacity().saturating_mul(2);
        self.reserve(target);
    }

    /// Grow the backing storage to at least `min_capacity` bytes.
    ///
    /// Installs a fresh array with the unconsumed span compacted to offset
    /// 0. Never shrinks.
    pub fn reserve(&mut self, min_capacity: usize) {
        if min_capacity <= self.capacity() {
            return;
        }

        let len = self.len();
        let mut storage = vec![0; min_capacity];
        if let Some(oldest) = self.oldest {
            let (head, tail) = self.segments(oldest, len);
            storage[..head.len()].copy_from_slice(head);
            storage[head.len()..len].copy_from_slice(tail);
            self.oldest = Some(0);
        }
        self.storage = storage;
        self.free_start = len;
    }

    fn consume(
        &mut self,
        oldest: usize,
        frame_len: usize,
        len: usize,
        scratch: &mut BytesMut,
    ) -> Bytes {
        let (head, tail) = self.segments(oldest, frame_len);
        scratch.reserve(frame_len);
        scratch.extend_from_slice(head);
        scratch.extend_from_slice(tail);

        // Skip the delimiter too.
        let consumed = frame_len + 1;
        if consumed == len {
            self.oldest = None;
            self.free_start = 0;
        } else {
            self.oldest = Some((oldest + consumed) % self.capacity());
        }
        self.scanned = 0;

        scratch.split().freeze()
    }

    /// The `len` bytes starting at `start`, as at most two slices.
    fn segments(&self, start: usize, len: usize) -> (&[u8], &[u8]) {
        let first_end = (start + len).min(self.capacity());
        let head = &self.storage[start..first_end];
        let tail = &self.storage[..len - head.len()];
        (head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(ring: &mut RingBuffer) -> Vec<Vec<u8>> {
        let mut scratch = BytesMut::new();
        let mut out = Vec::new();
        while let Some(frame) = ring.next_frame(&mut scratch) {
            out.push(frame.to_vec());
        }
        out
    }

    #[test]
    fn empty_buffer_has_no_frame() {
        let mut ring = RingBuffer::with_capacity(8);
        assert!(ring.is_empty());
        assert_eq!(ring.len(), 0);
        assert!(drain(&mut ring).is_empty());
    }

    #[test]
    fn single_frame_resets_indices() {
        let mut ring = RingBuffer::with_capacity(16);
        ring.extend_from_slice(b"abc\0");
        assert_eq!(drain(&mut ring), vec![b"abc".to_vec()]);
        assert!(ring.is_empty());
        assert_eq!(ring.writable().len(), 16);
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let mut ring = RingBuffer::with_capacity(16);
        ring.extend_from_slice(b"one\0tw");
        assert_eq!(drain(&mut ring), vec![b"one".to_vec()]);
        assert_eq!(ring.len(), 2);

        ring.extend_from_slice(b"o\0");
        assert_eq!(drain(&mut ring), vec![b"two".to_vec()]);
        assert!(ring.is_empty());
    }

    #[test]
    fn empty_frames_are_delivered() {
        let mut ring = RingBuffer::with_capacity(8);
        ring.extend_from_slice(b"\0\0x\0");
        assert_eq!(
            drain(&mut ring),
            vec![Vec::new(), Vec::new(), b"x".to_vec()]
        );
    }

    #[test]
    fn frame_wrapping_around_end_is_copied_in_order() {
        let mut ring = RingBuffer::with_capacity(8);
        ring.extend_from_slice(b"abcde\0");
        // Leave one unconsumed byte near the end so the next write wraps.
        ring.extend_from_slice(b"x");
        assert_eq!(drain(&mut ring), vec![b"abcde".to_vec()]);
        assert_eq!(ring.len(), 1);

        // 'x' sits at offset 6; "yz" lands at 7 and 0, delimiter at 1.
        ring.extend_from_slice(b"yz\0");
        assert_eq!(ring.capacity(), 8);
        assert_eq!(drain(&mut ring), vec![b"xyz".to_vec()]);
        assert!(ring.is_empty());
    }

    #[test]
    fn growth_preserves_wrapped_unconsumed_bytes() {
        let mut ring = RingBuffer::with_capacity(4);
        ring.extend_from_slice(b"ab\0c");
        assert_eq!(drain(&mut ring), vec![b"ab".to_vec()]);

        // 'c' sits at offset 3; "def" wraps to 0..3 and fills the buffer,
        // so "g\0" forces a growth with wrapped content.
        ring.extend_from_slice(b"defg\0");
        assert_eq!(ring.capacity(), 8);
        assert_eq!(drain(&mut ring), vec![b"cdefg".to_vec()]);
        assert!(ring.is_empty());
    }

    #[test]
    fn full_buffer_reports_full_and_grows() {
        let mut ring = RingBuffer::with_capacity(4);
        let free = ring.writable();
        free.copy_from_slice(b"wxyz");
        ring.commit(4);
        assert!(ring.is_full());
        assert!(ring.writable().is_empty());
        assert!(drain(&mut ring).is_empty());

        ring.grow();
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.len(), 4);
        assert!(!ring.is_full());

        let free = ring.writable();
        free[0] = 0;
        ring.commit(1);
        assert_eq!(drain(&mut ring), vec![b"wxyz".to_vec()]);
    }

    #[test]
    fn reserve_never_shrinks() {
        let mut ring = RingBuffer::with_capacity(32);
        ring.reserve(8);
        assert_eq!(ring.capacity(), 32);
        ring.reserve(64);
        assert_eq!(ring.capacity(), 64);
    }

    #[test]
    fn zero_capacity_is_usable() {
        let mut ring = RingBuffer::with_capacity(0);
        ring.extend_from_slice(b"grow\0");
        assert_eq!(drain(&mut ring), vec![b"grow".to_vec()]);
    }
}
