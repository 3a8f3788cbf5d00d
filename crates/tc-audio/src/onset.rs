use std::collections::VecDeque;

use tc_core::config::{AppConfig, Tuning};
use tc_core::feature::{FeatureSpec, FeatureWriter};
use tc_core::frame::AudioFrame;
use tc_core::traits::{AnalyzerEvent, FeatureAnalyzer};

use crate::error::{AudioError, check_window};
use crate::fft::FftPipeline;
use crate::history::SlidingWindow;

/// Regularizes the modified Kullback-Leibler ratio on empty bins.
const MKL_EPSILON: f32 = 1e-3;
/// Novelty values used for the adaptive threshold.
const PEAK_HISTORY: usize = 6;
const MIN_ONSET_GAP_SECS: f32 = 0.05;

/// Onset tracker: modified Kullback-Leibler novelty with median peak picking.
///
/// Runs an FFT over `onset_window` samples every block (hop = one buffer).
/// The exported `onsetNovelty` is the thresholded novelty,
/// `novelty - (median + threshold * mean)` over the last few blocks; it is
/// positive while a transient stands out. An [`AnalyzerEvent::Onset`] is raised
/// on each rising edge, outside silence and at most once per 50 ms.
pub struct OnsetTracker {
    mono: Vec<f32>,
    window: SlidingWindow,
    fft: FftPipeline,
    prev_mag: Vec<f32>,
    history: VecDeque<f32>,
    sorted: Vec<f32>,
    threshold: f32,
    thresholded: f32,
    above: bool,
    silence_rms: f32,
    min_gap: u64,
    ticks: u64,
    last_onset: Option<u64>,
}

impl OnsetTracker {
    /// Build from the analysis settings.
    ///
    /// # Errors
    /// Returns an error if `onset_window` is not a whole number of buffers.
    pub fn new(config: &AppConfig) -> Result<Self, AudioError> {
        let buffer = config.audio.buffer_size;
        let window = config.onset_window();
        check_window("onset", window, buffer)?;
        let fft = FftPipeline::new(window);
        let bins = fft.bins();
        let blocks_per_gap = MIN_ONSET_GAP_SECS * config.audio.sample_rate as f32 / buffer as f32;
        Ok(Self {
            mono: vec![0.0; buffer],
            window: SlidingWindow::new(window),
            fft,
            prev_mag: vec![0.0; bins],
            history: VecDeque::with_capacity(PEAK_HISTORY),
            sorted: Vec::with_capacity(PEAK_HISTORY),
            threshold: config.analysis.onset_threshold,
            thresholded: 0.0,
            above: false,
            silence_rms: 10f32.powf(config.analysis.silence_db / 20.0),
            min_gap: (blocks_per_gap.ceil() as u64).max(1),
            ticks: 0,
            last_onset: None,
        })
    }

    /// Current thresholded novelty.
    #[must_use]
    pub fn thresholded_novelty(&self) -> f32 {
        self.thresholded
    }

    fn median(&mut self) -> f32 {
        self.sorted.clear();
        self.sorted.extend(self.history.iter().copied());
        self.sorted.sort_unstable_by(f32::total_cmp);
        let n = self.sorted.len();
        match n {
            0 => 0.0,
            _ if n % 2 == 1 => self.sorted[n / 2],
            _ => 0.5 * (self.sorted[n / 2 - 1] + self.sorted[n / 2]),
        }
    }
}

impl FeatureAnalyzer for OnsetTracker {
    fn name(&self) -> &'static str {
        "onset"
    }

    fn features(&self) -> Vec<FeatureSpec> {
        vec![FeatureSpec::scalar("onsetNovelty")]
    }

    fn consume(&mut self, frame: &AudioFrame<'_>, emit: &mut dyn FnMut(AnalyzerEvent)) {
        self.ticks += 1;
        frame.mix_into(&mut self.mono);
        self.window.push(&self.mono);
        let rms = (self.mono.iter().map(|x| x * x).sum::<f32>() / self.mono.len().max(1) as f32).sqrt();

        let mag = self.fft.process(self.window.as_slice());
        let novelty: f32 = mag
            .iter()
            .zip(&self.prev_mag)
            .map(|(&m, &p)| (m / (p + MKL_EPSILON)).ln_1p())
            .sum();
        self.prev_mag.copy_from_slice(mag);

        if self.history.len() == PEAK_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(novelty);
        if self.history.len() < PEAK_HISTORY {
            self.thresholded = 0.0;
            return;
        }

        let median = self.median();
        let mean = self.history.iter().sum::<f32>() / PEAK_HISTORY as f32;
        self.thresholded = novelty - (median + self.threshold * mean);

        let rising = self.thresholded > 0.0 && !self.above;
        self.above = self.thresholded > 0.0;
        let ticks = self.ticks;
        let gap_ok = self.last_onset.is_none_or(|t| ticks - t >= self.min_gap);
        if rising && rms > self.silence_rms && gap_ok {
            self.last_onset = Some(ticks);
            emit(AnalyzerEvent::Onset {
                tick: frame.tick(),
                secs: frame.start_secs(),
            });
        }
    }

    fn latest(&self, out: &mut FeatureWriter<'_>) {
        out.scalar("onsetNovelty", self.thresholded);
    }

    fn retune(&mut self, tuning: &Tuning) {
        self.threshold = tuning.onset_threshold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(tracker: &mut OnsetTracker, blocks: &[Vec<f32>]) -> Vec<AnalyzerEvent> {
        let mut events = Vec::new();
        for (tick, block) in blocks.iter().enumerate() {
            let frame = AudioFrame::new(block, 1, 44100, tick as u64);
            tracker.consume(&frame, &mut |e| events.push(e));
        }
        events
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.audio.channels = 1;
        config
    }

    fn tone(freq: f32, tick: usize) -> Vec<f32> {
        (0..512)
            .map(|i| {
                let t = (tick * 512 + i) as f32 / 44100.0;
                0.5 * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn attack_after_silence_raises_one_onset() {
        let mut tracker = OnsetTracker::new(&config()).unwrap();
        let mut blocks = vec![vec![0.0f32; 512]; 10];
        blocks.extend((10..14).map(|t| tone(660.0, t)));
        let events = run(&mut tracker, &blocks);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AnalyzerEvent::Onset { tick: 10, .. }));
    }

    #[test]
    fn steady_tone_stays_below_threshold() {
        let mut tracker = OnsetTracker::new(&config()).unwrap();
        let blocks: Vec<Vec<f32>> = (0..40).map(|t| tone(440.0, t)).collect();
        let events = run(&mut tracker, &blocks[..8]);
        // the first blocks are the attack of the tone itself
        assert!(events.len() <= 1);
        let later = run(&mut tracker, &blocks[8..]);
        assert!(later.is_empty());
        assert!(tracker.thresholded_novelty() <= 0.0);
    }

    #[test]
    fn silence_never_fires() {
        let mut tracker = OnsetTracker::new(&config()).unwrap();
        let events = run(&mut tracker, &vec![vec![0.0f32; 512]; 20]);
        assert!(events.is_empty());
        assert_eq!(tracker.thresholded_novelty(), 0.0);
    }

    #[test]
    fn window_must_cover_whole_buffers() {
        let mut config = config();
        config.analysis.onset_window = Some(1000);
        assert!(matches!(
            OnsetTracker::new(&config),
            Err(AudioError::InvalidWindow { analyzer: "onset", .. })
        ));
    }
}
