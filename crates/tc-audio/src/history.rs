/// Sliding window over the last `len` samples, fed one block at a time.
///
/// Used by the analyzers whose window spans several buffers. Pre-allocated;
/// `push` shifts the window and never allocates.
///
/// # Example
/// ```
/// use tc_audio::history::SlidingWindow;
/// let mut w = SlidingWindow::new(4);
/// w.push(&[1.0, 2.0]);
/// assert!(!w.is_full());
/// w.push(&[3.0, 4.0]);
/// w.push(&[5.0, 6.0]);
/// assert!(w.is_full());
/// assert_eq!(w.as_slice(), &[3.0, 4.0, 5.0, 6.0]);
/// ```
#[derive(Clone, Debug)]
pub struct SlidingWindow {
    buf: Vec<f32>,
    filled: usize,
}

impl SlidingWindow {
    /// Window of `len` samples, initially silent.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            buf: vec![0.0; len],
            filled: 0,
        }
    }

    /// Append a block, dropping the oldest samples.
    pub fn push(&mut self, block: &[f32]) {
        let len = self.buf.len();
        let block = if block.len() > len {
            &block[block.len() - len..]
        } else {
            block
        };
        let n = block.len();
        self.buf.copy_within(n.., 0);
        self.buf[len - n..].copy_from_slice(block);
        self.filled = (self.filled + n).min(len);
    }

    /// `true` once a full window of real samples has been seen.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.filled == self.buf.len()
    }

    /// Window content, oldest sample first.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.buf
    }

    /// Window length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` for a zero-length window.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
