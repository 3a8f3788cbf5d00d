use tc_core::config::AppConfig;
use tc_core::feature::{FeatureSpec, FeatureWriter};
use tc_core::frame::AudioFrame;
use tc_core::traits::{AnalyzerEvent, FeatureAnalyzer};

use crate::error::{AudioError, check_window};
use crate::history::SlidingWindow;
use crate::yin::{Yin, hz_to_midi};

const MIN_HZ: f32 = 40.0;
const MAX_HZ: f32 = 4200.0;
const YIN_THRESHOLD: f32 = 0.15;
/// Below this periodicity the tracker reports no pitch.
const MIN_CONFIDENCE: f32 = 0.8;

/// Monophonic pitch tracker, reported as a fractional MIDI note.
///
/// YIN over the last `tracker_pitch_window` samples of the mono mix,
/// re-estimated every block. Reports 0 until the window is full, on silence,
/// and whenever the estimate is not periodic enough to be trusted.
pub struct PitchTracker {
    mono: Vec<f32>,
    window: SlidingWindow,
    yin: Yin,
    midi: f32,
    confidence: f32,
}

impl PitchTracker {
    /// Build from the analysis settings.
    ///
    /// # Errors
    /// Returns an error if `tracker_pitch_window` is not a whole number of buffers.
    pub fn new(config: &AppConfig) -> Result<Self, AudioError> {
        let buffer = config.audio.buffer_size;
        let window = config.tracker_pitch_window();
        check_window("pitch", window, buffer)?;
        Ok(Self {
            mono: vec![0.0; buffer],
            window: SlidingWindow::new(window),
            yin: Yin::new(window, config.audio.sample_rate, MIN_HZ, MAX_HZ, YIN_THRESHOLD),
            midi: 0.0,
            confidence: 0.0,
        })
    }

    /// Latest MIDI pitch, 0 when unvoiced.
    #[must_use]
    pub fn midi(&self) -> f32 {
        self.midi
    }

    /// Confidence of the latest estimate.
    #[must_use]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

impl FeatureAnalyzer for PitchTracker {
    fn name(&self) -> &'static str {
        "pitch"
    }

    fn features(&self) -> Vec<FeatureSpec> {
        vec![FeatureSpec::scalar("monophonicMidiPitch")]
    }

    fn consume(&mut self, frame: &AudioFrame<'_>, _emit: &mut dyn FnMut(AnalyzerEvent)) {
        frame.mix_into(&mut self.mono);
        self.window.push(&self.mono);
        if !self.window.is_full() {
            return;
        }
        let est = self.yin.estimate(self.window.as_slice());
        self.confidence = est.confidence;
        self.midi = if est.freq > 0.0 && est.confidence >= MIN_CONFIDENCE {
            hz_to_midi(est.freq)
        } else {
            0.0
        };
    }

    fn latest(&self, out: &mut FeatureWriter<'_>) {
        out.scalar("monophonicMidiPitch", self.midi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(tracker: &mut PitchTracker, ticks: usize, freq: f32) {
        for tick in 0..ticks {
            let block: Vec<f32> = (0..512)
                .map(|i| {
                    let t = (tick * 512 + i) as f32 / 44100.0;
                    0.4 * (2.0 * std::f32::consts::PI * freq * t).sin()
                })
                .collect();
            tracker.consume(&AudioFrame::new(&block, 1, 44100, tick as u64), &mut |_| {});
        }
    }

    #[test]
    fn reports_midi_once_window_is_full() {
        let mut config = AppConfig::default();
        config.audio.channels = 1;
        let mut tracker = PitchTracker::new(&config).unwrap();
        feed(&mut tracker, 7, 440.0);
        assert_eq!(tracker.midi(), 0.0);
        feed(&mut tracker, 8, 440.0);
        assert!((tracker.midi() - 69.0).abs() < 0.1, "midi = {}", tracker.midi());
    }

    #[test]
    fn silence_is_unvoiced() {
        let mut tracker = PitchTracker::new(&AppConfig::default()).unwrap();
        let zeros = [0.0f32; 1024];
        for tick in 0..10 {
            tracker.consume(&AudioFrame::new(&zeros, 2, 44100, tick), &mut |_| {});
        }
        assert_eq!(tracker.midi(), 0.0);
    }
}
