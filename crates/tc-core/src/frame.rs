/// Vue en lecture seule d'un bloc audio entrelacé livré par la source.
///
/// Un `AudioFrame` n'existe que pendant le callback : il emprunte le buffer
/// de la source et n'est jamais retenu au-delà du tick. Les analyseurs qui
/// ont besoin d'historique copient ce qu'il leur faut dans leur propre état.
///
/// # Example
/// ```
/// use tc_core::frame::AudioFrame;
/// let samples = [0.5f32, -0.5, 0.25, -0.25];
/// let frame = AudioFrame::new(&samples, 2, 44100, 0);
/// assert_eq!(frame.frames(), 2);
/// assert_eq!(frame.channel(1).collect::<Vec<_>>(), vec![-0.5, -0.25]);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct AudioFrame<'a> {
    samples: &'a [f32],
    channels: usize,
    sample_rate: u32,
    tick: u64,
}

impl<'a> AudioFrame<'a> {
    /// Wrap an interleaved block. `channels` of 0 is treated as mono.
    #[must_use]
    pub fn new(samples: &'a [f32], channels: usize, sample_rate: u32, tick: u64) -> Self {
        let channels = channels.max(1);
        debug_assert_eq!(samples.len() % channels, 0, "partial frame in block");
        Self {
            samples,
            channels,
            sample_rate,
            tick,
        }
    }

    /// Raw interleaved samples.
    #[inline]
    #[must_use]
    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    /// Number of interleaved channels.
    #[inline]
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of sample frames (samples per channel).
    #[inline]
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Sample rate of the stream in Hz.
    #[inline]
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Index of this block since the stream started.
    #[inline]
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Iterate over one channel. An out-of-range index reads the last channel.
    pub fn channel(&self, index: usize) -> impl Iterator<Item = f32> + 'a {
        let index = index.min(self.channels - 1);
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels)
            .copied()
    }

    /// Copy one channel into `out`, zero-filling whatever the block does not cover.
    pub fn copy_channel_into(&self, index: usize, out: &mut [f32]) {
        let mut it = self.channel(index);
        for slot in out.iter_mut() {
            *slot = it.next().unwrap_or(0.0);
        }
    }

    /// Downmix all channels to mono into `out`.
    ///
    /// # Example
    /// ```
    /// use tc_core::frame::AudioFrame;
    /// let samples = [1.0f32, 0.0, 0.5, 0.5];
    /// let frame = AudioFrame::new(&samples, 2, 48000, 3);
    /// let mut mono = [0.0f32; 2];
    /// frame.mix_into(&mut mono);
    /// assert_eq!(mono, [0.5, 0.5]);
    /// ```
    pub fn mix_into(&self, out: &mut [f32]) {
        let scale = 1.0 / self.channels as f32;
        let mut chunks = self.samples.chunks_exact(self.channels);
        for slot in out.iter_mut() {
            *slot = chunks
                .next()
                .map_or(0.0, |chunk| chunk.iter().sum::<f32>() * scale);
        }
    }

    /// Duration of the block in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Stream time at the start of this block, assuming fixed-size blocks.
    #[must_use]
    pub fn start_secs(&self) -> f64 {
        self.tick as f64 * self.duration_secs()
    }
}
