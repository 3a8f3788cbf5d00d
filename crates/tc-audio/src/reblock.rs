use tc_core::frame::AudioFrame;

/// Regroups interleaved samples of any callback size into fixed-size blocks.
///
/// Devices rarely honour the requested buffer size exactly; the analyzers
/// need it exactly. Each full block is handed out as an [`AudioFrame`] with a
/// monotonically increasing tick. Pre-allocated, `push` never allocates.
///
/// # Example
/// ```
/// use tc_audio::reblock::Reblocker;
/// let mut r = Reblocker::new(4, 2, 48000);
/// let mut ticks = Vec::new();
/// r.push(&[0.0; 5], &mut |f| ticks.push(f.tick()));
/// r.push(&[0.0; 12], &mut |f| ticks.push(f.tick()));
/// assert_eq!(ticks, vec![0, 1]); // 17 samples = 2 blocks of 8 + 1
/// ```
pub struct Reblocker {
    block: Vec<f32>,
    fill: usize,
    channels: usize,
    sample_rate: u32,
    tick: u64,
}

impl Reblocker {
    /// Blocks of `frames` frames of `channels` interleaved samples.
    #[must_use]
    pub fn new(frames: usize, channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        Self {
            block: vec![0.0; frames.max(1) * channels],
            fill: 0,
            channels,
            sample_rate,
            tick: 0,
        }
    }

    /// Append samples, calling `on_block` for every block completed.
    pub fn push(&mut self, mut data: &[f32], on_block: &mut dyn FnMut(&AudioFrame<'_>)) {
        while !data.is_empty() {
            let take = (self.block.len() - self.fill).min(data.len());
            self.block[self.fill..self.fill + take].copy_from_slice(&data[..take]);
            self.fill += take;
            data = &data[take..];
            if self.fill == self.block.len() {
                self.emit(on_block);
            }
        }
    }

    /// Zero-pad and emit a pending partial block, if any.
    pub fn finish(&mut self, on_block: &mut dyn FnMut(&AudioFrame<'_>)) {
        if self.fill == 0 {
            return;
        }
        self.block[self.fill..].fill(0.0);
        self.emit(on_block);
    }

    /// Blocks emitted so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Samples per block (frames × channels).
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.block.len()
    }

    fn emit(&mut self, on_block: &mut dyn FnMut(&AudioFrame<'_>)) {
        let frame = AudioFrame::new(&self.block, self.channels, self.sample_rate, self.tick);
        on_block(&frame);
        self.tick += 1;
        self.fill = 0;
    }
}
