use std::collections::VecDeque;

use tc_core::config::AppConfig;
use tc_core::feature::{FeatureSpec, FeatureWriter};
use tc_core::frame::AudioFrame;
use tc_core::traits::{AnalyzerEvent, FeatureAnalyzer};

use crate::error::{AudioError, check_window};
use crate::fft::FftPipeline;
use crate::history::SlidingWindow;

const WARMUP_TICKS: u64 = 10;
const COOLDOWN_SECS: f32 = 0.13;
const MAX_INTERVALS: usize = 16;
const MIN_INTERVALS: usize = 4;

/// Beat / tempo tracker.
///
/// Spectral flux with an adaptive threshold and onset cooldown; the tempo is
/// the mean of the last inter-beat intervals. Flux is relative to the current
/// spectrum energy and weights the bass quarter of the spectrum double.
///
/// # Example
/// ```
/// use tc_audio::beat::BeatTracker;
/// use tc_core::config::AppConfig;
/// let tracker = BeatTracker::new(&AppConfig::default()).unwrap();
/// assert_eq!(tracker.bpm(), 0.0);
/// ```
pub struct BeatTracker {
    mono: Vec<f32>,
    window: SlidingWindow,
    fft: FftPipeline,
    /// Previous spectrum for flux calculation.
    prev_spectrum: Vec<f32>,
    /// Running average of flux for adaptive threshold.
    flux_avg: f32,
    /// Blocks per second.
    fps: f32,
    bpm: f32,
    silence_rms: f32,
    last_beat_tick: u64,
    tick_count: u64,
    /// Inter-beat intervals in ticks.
    intervals: VecDeque<u64>,
}

impl BeatTracker {
    /// Build from the analysis settings.
    ///
    /// # Errors
    /// Returns an error if `beat_window` is not a whole number of buffers.
    pub fn new(config: &AppConfig) -> Result<Self, AudioError> {
        let buffer = config.audio.buffer_size;
        let window = config.beat_window();
        check_window("beat", window, buffer)?;
        let fft = FftPipeline::new(window);
        let bins = fft.bins();
        Ok(Self {
            mono: vec![0.0; buffer],
            window: SlidingWindow::new(window),
            fft,
            prev_spectrum: vec![0.0; bins],
            flux_avg: 0.0,
            fps: config.audio.sample_rate as f32 / buffer as f32,
            bpm: 0.0,
            silence_rms: 10f32.powf(config.analysis.silence_db / 20.0),
            last_beat_tick: 0,
            tick_count: 0,
            intervals: VecDeque::with_capacity(MAX_INTERVALS),
        })
    }

    /// Last tempo estimate, 0 until enough beats were seen.
    #[must_use]
    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Returns `true` when this block carries a beat.
    fn detect(&mut self, rms: f32) -> bool {
        self.tick_count += 1;
        let spectrum = self.fft.process(self.window.as_slice());

        let total: f32 = spectrum.iter().sum();
        let bass_cutoff = spectrum.len() / 4;
        let flux: f32 = if total > f32::EPSILON {
            spectrum
                .iter()
                .zip(self.prev_spectrum.iter())
                .enumerate()
                .map(|(i, (&cur, &prev))| {
                    let diff = (cur - prev).max(0.0);
                    if i < bass_cutoff { diff * 2.0 } else { diff }
                })
                .sum::<f32>()
                / total
        } else {
            0.0
        };
        self.prev_spectrum.copy_from_slice(spectrum);

        self.flux_avg = self.flux_avg * 0.93 + flux * 0.07;
        let threshold = self.flux_avg * 1.5 + 0.01;

        let cooldown = (self.fps * COOLDOWN_SECS).max(2.0) as u64;
        let since = self.tick_count - self.last_beat_tick;
        let beat = self.tick_count > WARMUP_TICKS
            && rms > self.silence_rms
            && flux > threshold
            && since > cooldown;
        if !beat {
            return false;
        }

        self.last_beat_tick = self.tick_count;
        if since > 5 && since < 300 {
            self.intervals.push_back(since);
            if self.intervals.len() > MAX_INTERVALS {
                self.intervals.pop_front();
            }
            if self.intervals.len() >= MIN_INTERVALS {
                let avg = self.intervals.iter().map(|&i| i as f64).sum::<f64>()
                    / self.intervals.len() as f64;
                if avg > 0.0 {
                    self.bpm = ((60.0 * f64::from(self.fps) / avg) as f32).clamp(30.0, 300.0);
                }
            }
        }
        true
    }
}

impl FeatureAnalyzer for BeatTracker {
    fn name(&self) -> &'static str {
        "beat"
    }

    fn features(&self) -> Vec<FeatureSpec> {
        vec![FeatureSpec::scalar("bpm")]
    }

    fn consume(&mut self, frame: &AudioFrame<'_>, emit: &mut dyn FnMut(AnalyzerEvent)) {
        frame.mix_into(&mut self.mono);
        self.window.push(&self.mono);
        let rms = (self.mono.iter().map(|x| x * x).sum::<f32>() / self.mono.len().max(1) as f32).sqrt();
        if self.detect(rms) {
            emit(AnalyzerEvent::Beat {
                tick: frame.tick(),
                secs: frame.start_secs(),
                bpm: self.bpm,
            });
        }
    }

    fn latest(&self, out: &mut FeatureWriter<'_>) {
        out.scalar("bpm", self.bpm);
    }
}
