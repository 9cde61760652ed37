/// Max capacity to keep for the inner `Vec<u8>` when `WriteBuf::clear` is called.
const MAX_CAPACITY_WHEN_CLEARED: usize = 16384; // 16 kib

/// Growable buffer backed by a [`Vec<u8>`] that is incrementally filled.
///
/// Tracks the filled region and provides methods to grow and write into the
/// unfilled region.
pub struct WriteBuf {
    inner: Vec<u8>,
    filled: usize,
}

impl WriteBuf {
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: Vec::new(),
            filled: 0,
        }
    }

    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.inner
    }

    /// Length of the filled region.
    #[inline]
    pub const fn filled_len(&self) -> usize {
        self.filled
    }

    /// Shared reference to the filled portion of the buffer.
    #[inline]
    pub fn filled(&self) -> &[u8] {
        &self.inner[..self.filled]
    }

    /// Ensures the initialized and unfilled portion of the buffer is big
    /// enough for `additional` more bytes.
    #[inline]
    pub fn initialize(&mut self, additional: usize) {
        if self.inner.len() < self.filled + additional {
            self.inner.resize(self.filled + additional, 0);
        }
    }

    /// Mutable reference to the first `n` bytes of the unfilled part of the
    /// buffer, allocating additional memory as necessary.
    #[inline]
    pub fn unfilled_to(&mut self, n: usize) -> &mut [u8] {
        self.initialize(n);
        &mut self.inner[self.filled..self.filled + n]
    }

    #[inline]
    pub fn write_slice(&mut self, slice: &[u8]) {
        let n = slice.len();
        self.initialize(n);
        self.inner[self.filled..self.filled + n].copy_from_slice(slice);
        self.filled += n;
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.write_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.write_slice(&value.to_le_bytes());
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.write_slice(&value.to_le_bytes());
    }

    /// Set the filled cursor to the very beginning of the buffer.
    ///
    /// If the buffer grew big, it is shrunk in order to reclaim memory.
    #[inline]
    pub fn clear(&mut self) {
        self.filled = 0;
        self.inner.shrink_to(MAX_CAPACITY_WHEN_CLEARED);
    }

    /// Advances the buffer’s cursor of `len` bytes.
    #[inline]
    pub fn advance(&mut self, len: usize) {
        self.filled += len;
        debug_assert!(self.filled <= self.inner.len());
    }
}

impl Default for WriteBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl std::io::Write for WriteBuf {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_slice(buf);
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
