use tc_core::config::{AppConfig, Tuning};
use tc_core::feature::{FeatureSpec, FeatureWriter};
use tc_core::frame::AudioFrame;
use tc_core::traits::{AnalyzerEvent, FeatureAnalyzer};

use crate::smoothing::Smoother;
use crate::yin::midi_to_hz;

/// Constant-peak band-pass biquad (RBJ cookbook), transposed direct form II.
#[derive(Clone, Debug)]
struct Biquad {
    b0: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn bandpass(center_hz: f64, q: f64, sample_rate: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * center_hz / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b0: alpha / a0,
            b2: -alpha / a0,
            a1: -2.0 * w0.cos() / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline(always)]
    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = -self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// One band-pass filter per MIDI note, reporting smoothed band energy.
///
/// Energy is the mean square of each filter's output over one block, then
/// exponentially smoothed. Values are linear; the snapshot writer converts
/// them to dB with the configured floor.
///
/// # Example
/// ```
/// use tc_audio::filterbank::FilterBank;
/// use tc_core::config::AppConfig;
/// let bank = FilterBank::new(&AppConfig::default());
/// assert_eq!(bank.len(), 88); // MIDI 21..=108
/// ```
pub struct FilterBank {
    midi_min: u8,
    filters: Vec<Biquad>,
    mono: Vec<f32>,
    energy: Vec<f32>,
    smoothed: Vec<f32>,
    smoother: Smoother,
}

impl FilterBank {
    /// Build the bank for `[midi_min, midi_max]` at the stream sample rate.
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        let a = &config.analysis;
        let sr = f64::from(config.audio.sample_rate);
        let half_bw = f64::from(a.filterbank_bandwidth) / 24.0;
        let q = 1.0 / (2f64.powf(half_bw) - 2f64.powf(-half_bw));
        let filters: Vec<Biquad> = (a.midi_min..=a.midi_max)
            .map(|note| Biquad::bandpass(f64::from(midi_to_hz(f32::from(note))), q, sr))
            .collect();
        let bands = filters.len();
        Self {
            midi_min: a.midi_min,
            filters,
            mono: vec![0.0; config.audio.buffer_size],
            energy: vec![0.0; bands],
            smoothed: vec![0.0; bands],
            smoother: Smoother::new(a.filterbank_smoothing),
        }
    }

    /// Number of bands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// `true` with no band.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// MIDI note of band `index`.
    #[must_use]
    pub fn note(&self, index: usize) -> u8 {
        self.midi_min.saturating_add(index.min(usize::from(u8::MAX)) as u8)
    }

    /// Smoothed linear energies, one per note, lowest first.
    #[must_use]
    pub fn energies(&self) -> &[f32] {
        &self.smoothed
    }
}

impl FeatureAnalyzer for FilterBank {
    fn name(&self) -> &'static str {
        "filterbank"
    }

    fn features(&self) -> Vec<FeatureSpec> {
        vec![FeatureSpec::vector("polyphonicPitch", self.len())]
    }

    fn consume(&mut self, frame: &AudioFrame<'_>, _emit: &mut dyn FnMut(AnalyzerEvent)) {
        if self.mono.len() != frame.frames() {
            self.mono.resize(frame.frames(), 0.0);
        }
        frame.mix_into(&mut self.mono);
        let n = self.mono.len().max(1) as f64;

        for (filter, energy) in self.filters.iter_mut().zip(self.energy.iter_mut()) {
            let mut acc = 0.0f64;
            for &x in &self.mono {
                let y = filter.process(f64::from(x));
                acc += y * y;
            }
            *energy = (acc / n) as f32;
        }
        self.smoother.slice(&mut self.smoothed, &self.energy);
        self.smoother.commit();
    }

    fn latest(&self, out: &mut FeatureWriter<'_>) {
        out.vector_db("polyphonicPitch", &self.smoothed);
    }

    fn retune(&mut self, tuning: &Tuning) {
        self.smoother.set_amount(tuning.filterbank_smoothing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, tick: u64) -> Vec<f32> {
        (0..512)
            .map(|i| {
                let t = (tick as usize * 512 + i) as f32 / 44100.0;
                0.5 * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn a440_peaks_on_note_69() {
        let mut config = AppConfig::default();
        config.audio.channels = 1;
        let mut bank = FilterBank::new(&config);
        for tick in 0..30 {
            let block = tone(440.0, tick);
            bank.consume(&AudioFrame::new(&block, 1, 44100, tick), &mut |_| {});
        }
        let (best, _) = bank
            .energies()
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |acc, (i, &e)| if e > acc.1 { (i, e) } else { acc });
        assert_eq!(bank.note(best), 69);
        // unit peak gain: close to A²/2
        assert!((bank.energies()[best] - 0.125).abs() < 0.03);
        assert!(bank.energies()[best + 12] < bank.energies()[best] * 0.01);
    }

    #[test]
    fn silence_is_zero_energy() {
        let mut bank = FilterBank::new(&AppConfig::default());
        let zeros = [0.0f32; 1024];
        bank.consume(&AudioFrame::new(&zeros, 2, 44100, 0), &mut |_| {});
        assert!(bank.energies().iter().all(|&e| e == 0.0));
        assert_eq!(bank.features(), vec![FeatureSpec::vector("polyphonicPitch", 88)]);
    }
}
