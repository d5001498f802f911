//! Bounded cursor over a captured byte window.
//!
//! Captured data is a window `[start, end)` into a larger buffer (a TCP
//! segment payload inside a packet, or a plaintext buffer handed to a TLS
//! library call). Every read is checked against the window end, and the
//! current offset may be moved past the end: the next read then fails
//! instead of panicking.

/// A read would cross the end of the available data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds;

/// Offset-based, bounds-checked access to a byte window.
///
/// Offsets are absolute positions in the underlying buffer, so a window that
/// starts in the middle of a packet keeps its original coordinates.
pub trait PacketCursor {
    /// Current read position.
    fn offset(&self) -> usize;

    /// One past the last readable byte.
    fn data_end(&self) -> usize;

    /// Move the read position to an absolute offset.
    fn set_offset(&mut self, offset: usize);

    /// Fill `dst` from the absolute `offset` without moving the cursor.
    fn load_bytes_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), OutOfBounds>;

    /// Fill `dst` from the current position without moving the cursor.
    fn load_bytes(&self, dst: &mut [u8]) -> Result<(), OutOfBounds> {
        self.load_bytes_at(self.offset(), dst)
    }

    /// Move the read position forward by `len` bytes.
    fn advance(&mut self, len: usize) {
        let offset = self.offset().saturating_add(len);
        self.set_offset(offset);
    }
}

/// A `PacketCursor` over a borrowed slice.
#[derive(Debug, Clone)]
pub struct SliceCursor<'a> {
    data: &'a [u8],
    offset: usize,
    end: usize,
}

impl<'a> SliceCursor<'a> {
    /// Cursor over the whole slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            end: data.len(),
        }
    }

    /// Cursor over `data[start..end]`, keeping absolute offsets.
    ///
    /// `end` is clamped to the slice length and `start` to `end`.
    pub fn window(data: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(data.len());
        Self {
            data,
            offset: start.min(end),
            end,
        }
    }

    /// Bytes left between the cursor and the window end.
    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.offset)
    }
}

impl PacketCursor for SliceCursor<'_> {
    fn offset(&self) -> usize {
        self.offset
    }

    fn data_end(&self) -> usize {
        self.end
    }

    fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn load_bytes_at(&self, offset: usize, dst: &mut [u8]) -> Result<(), OutOfBounds> {
        let stop = offset.checked_add(dst.len()).ok_or(OutOfBounds)?;
        if stop > self.end {
            return Err(OutOfBounds);
        }
        dst.copy_from_slice(&self.data[offset..stop]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_does_not_advance() {
        let cursor = SliceCursor::new(b"abcdef");
        let mut buf = [0u8; 3];
        cursor.load_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        assert_eq!(cursor.offset(), 0);
    }

    #[test]
    fn test_advance_past_end_fails_reads() {
        let mut cursor = SliceCursor::new(b"ab");
        cursor.advance(5);
        assert_eq!(cursor.offset(), 5);
        assert_eq!(cursor.remaining(), 0);

        let mut buf = [0u8; 1];
        assert_eq!(cursor.load_bytes(&mut buf), Err(OutOfBounds));
    }

    #[test]
    fn test_window_keeps_absolute_offsets() {
        let data = b"HEADERpayloadTRAILER";
        let mut cursor = SliceCursor::window(data, 6, 13);
        assert_eq!(cursor.offset(), 6);
        assert_eq!(cursor.data_end(), 13);

        let mut buf = [0u8; 7];
        cursor.load_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"payload");

        // The trailer is outside the window.
        cursor.advance(7);
        let mut one = [0u8; 1];
        assert!(cursor.load_bytes(&mut one).is_err());
        assert!(cursor.load_bytes_at(12, &mut one).is_ok());
    }

    #[test]
    fn test_window_clamps_bounds() {
        let cursor = SliceCursor::window(b"abc", 10, 100);
        assert_eq!(cursor.data_end(), 3);
        assert_eq!(cursor.offset(), 3);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_load_at_overflow() {
        let cursor = SliceCursor::new(b"abc");
        let mut buf = [0u8; 2];
        assert_eq!(cursor.load_bytes_at(usize::MAX, &mut buf), Err(OutOfBounds));
    }
}
