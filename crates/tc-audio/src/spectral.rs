use std::collections::VecDeque;

use tc_core::config::{AppConfig, NormalizationConfig, Tuning};
use tc_core::error::CoreError;
use tc_core::feature::{FeatureSpec, FeatureWriter};
use tc_core::frame::AudioFrame;
use tc_core::traits::{AnalyzerEvent, FeatureAnalyzer};

use crate::error::{AudioError, check_window};
use crate::fft::FftPipeline;
use crate::history::SlidingWindow;
use crate::hpcp::hpcp;
use crate::mel::{MelBands, Mfcc};
use crate::peaks::{self, Peak};
use crate::smoothing::Smoother;
use crate::yin::{PitchEstimate, Yin};

/// Number of mel bands.
pub const MEL_BANDS: usize = 24;
/// Number of cepstral coefficients.
pub const MFCC_COEFFS: usize = 13;
/// Number of chroma bins.
pub const HPCP_BINS: usize = 12;

const HARMONICS: usize = 10;
const HARMONIC_TOLERANCE: f32 = 0.2;
const MAX_PEAKS: usize = 100;
const PEAK_THRESHOLD: f32 = 0.005;
const ROLL_OFF_CUTOFF: f32 = 0.85;
const SALIENCE_LOW_HZ: f32 = 100.0;
const SALIENCE_HIGH_HZ: f32 = 5000.0;
const PITCH_MIN_HZ: f32 = 40.0;
const PITCH_MAX_HZ: f32 = 4200.0;
const YIN_THRESHOLD: f32 = 0.15;

const ONSET_NOVELTY_MIN: f32 = 0.3;
const ONSET_RATIO: f32 = 1.5;
const ONSET_HISTORY: usize = 8;
const ONSET_WARMUP_TICKS: u64 = 4;
const ONSET_MIN_GAP_SECS: f32 = 0.1;

/// Scalar outputs, in wire order.
const SCALARS: [&str; 14] = [
    "rms",
    "power",
    "pitchFreq",
    "pitchConf",
    "pitchSalience",
    "inharmonicity",
    "hfc",
    "specComp",
    "centroid",
    "rollOff",
    "oddToEven",
    "strongPeak",
    "strongDecay",
    "dissonance",
];

/// Normalized variants, in wire order.
const NORMS: [&str; 8] = [
    "pitchFreqNorm",
    "hfcNorm",
    "specCompNorm",
    "centroidNorm",
    "rollOffNorm",
    "oddToEvenNorm",
    "strongPeakNorm",
    "strongDecayNorm",
];

/// One set of spectral descriptors (raw or smoothed).
#[derive(Clone, Debug)]
struct Descriptors {
    rms: f32,
    power: f32,
    pitch_freq: f32,
    pitch_conf: f32,
    pitch_salience: f32,
    inharmonicity: f32,
    hfc: f32,
    spec_comp: f32,
    centroid: f32,
    roll_off: f32,
    odd_to_even: f32,
    strong_peak: f32,
    strong_decay: f32,
    dissonance: f32,
    spectrum: Vec<f32>,
    mel_bands: Vec<f32>,
    mfcc: Vec<f32>,
    tristimulus: [f32; 3],
    hpcp: [f32; HPCP_BINS],
}

impl Descriptors {
    fn new(bins: usize) -> Self {
        Self {
            rms: 0.0,
            power: 0.0,
            pitch_freq: 0.0,
            pitch_conf: 0.0,
            pitch_salience: 0.0,
            inharmonicity: 0.0,
            hfc: 0.0,
            spec_comp: 0.0,
            centroid: 0.0,
            roll_off: 0.0,
            odd_to_even: 0.0,
            strong_peak: 0.0,
            strong_decay: 0.0,
            dissonance: 0.0,
            spectrum: vec![0.0; bins],
            mel_bands: vec![0.0; MEL_BANDS],
            mfcc: vec![0.0; MFCC_COEFFS],
            tristimulus: [0.0; 3],
            hpcp: [0.0; HPCP_BINS],
        }
    }

    /// Scalars in `SCALARS` order.
    fn scalars(&self) -> [f32; 14] {
        [
            self.rms,
            self.power,
            self.pitch_freq,
            self.pitch_conf,
            self.pitch_salience,
            self.inharmonicity,
            self.hfc,
            self.spec_comp,
            self.centroid,
            self.roll_off,
            self.odd_to_even,
            self.strong_peak,
            self.strong_decay,
            self.dissonance,
        ]
    }

    fn scalars_mut(&mut self) -> [&mut f32; 14] {
        [
            &mut self.rms,
            &mut self.power,
            &mut self.pitch_freq,
            &mut self.pitch_conf,
            &mut self.pitch_salience,
            &mut self.inharmonicity,
            &mut self.hfc,
            &mut self.spec_comp,
            &mut self.centroid,
            &mut self.roll_off,
            &mut self.odd_to_even,
            &mut self.strong_peak,
            &mut self.strong_decay,
            &mut self.dissonance,
        ]
    }

    fn smooth_from(&mut self, raw: &Self, smoother: &Smoother) {
        for (state, current) in self.scalars_mut().into_iter().zip(raw.scalars()) {
            smoother.scalar(state, current);
        }
        smoother.slice(&mut self.spectrum, &raw.spectrum);
        smoother.slice(&mut self.mel_bands, &raw.mel_bands);
        smoother.slice(&mut self.mfcc, &raw.mfcc);
        smoother.slice(&mut self.tristimulus, &raw.tristimulus);
        smoother.slice(&mut self.hpcp, &raw.hpcp);
    }
}

/// Per-block spectral analyzer: level, pitch, timbre and shape descriptors.
///
/// Reads one channel of each block. The spectrum covers exactly one buffer
/// (`buffer_size / 2 + 1` bins); the pitch estimate uses a longer history
/// (`pitch_window`). Every output may be exponentially smoothed; the eight
/// `*Norm` variants map the smoothed values into `[0, 1]` with the configured
/// ranges.
///
/// On silence every output sits at its floor (0, or the MFCC log floor) and
/// nothing is NaN.
pub struct SpectralAnalyzer {
    channel: usize,
    bin_hz: f32,
    salience_lags: (usize, usize),
    block: Vec<f32>,
    fft: FftPipeline,
    pitch_history: SlidingWindow,
    yin: Yin,
    mel: MelBands,
    mfcc: Mfcc,
    peaks: Vec<Peak>,
    harmonics: [Peak; HARMONICS],
    raw: Descriptors,
    out: Descriptors,
    smoother: Smoother,
    norm: NormalizationConfig,
    // isOnset state
    prev_mag: Vec<f32>,
    prev_hfc: f32,
    novelty: VecDeque<f32>,
    silence_rms: f32,
    min_onset_gap: u64,
    ticks: u64,
    last_onset: Option<u64>,
    is_onset: bool,
}

impl SpectralAnalyzer {
    /// Build from the stream and analysis settings.
    ///
    /// # Errors
    /// Returns an error if the pitch window is not a whole number of buffers
    /// or the analysis channel does not exist.
    pub fn new(config: &AppConfig) -> Result<Self, AudioError> {
        let buffer = config.audio.buffer_size;
        let pitch_window = config.pitch_window();
        check_window("spectral", pitch_window, buffer)?;
        if config.analysis.channel >= usize::from(config.audio.channels.max(1)) {
            return Err(CoreError::Config(format!(
                "analysis.channel {} absent (channels = {})",
                config.analysis.channel, config.audio.channels
            ))
            .into());
        }

        let sr = config.audio.sample_rate;
        let fft = FftPipeline::new(buffer);
        let bins = fft.bins();
        let bin_hz = sr as f32 / buffer as f32;
        let salience_lags = (
            ((SALIENCE_LOW_HZ / bin_hz).ceil() as usize).max(1),
            (SALIENCE_HIGH_HZ / bin_hz).floor() as usize,
        );
        let blocks_per_gap = ONSET_MIN_GAP_SECS * sr as f32 / buffer as f32;

        Ok(Self {
            channel: config.analysis.channel,
            bin_hz,
            salience_lags,
            block: vec![0.0; buffer],
            fft,
            pitch_history: SlidingWindow::new(pitch_window),
            yin: Yin::new(pitch_window, sr, PITCH_MIN_HZ, PITCH_MAX_HZ, YIN_THRESHOLD),
            mel: MelBands::new(MEL_BANDS, bins, sr, 0.0, sr as f32 / 2.0),
            mfcc: Mfcc::new(MEL_BANDS, MFCC_COEFFS),
            peaks: Vec::with_capacity(MAX_PEAKS * 2),
            harmonics: [Peak::default(); HARMONICS],
            raw: Descriptors::new(bins),
            out: Descriptors::new(bins),
            smoother: Smoother::new(config.analysis.smoothing),
            norm: config.normalization.clone(),
            prev_mag: vec![0.0; bins],
            prev_hfc: 0.0,
            novelty: VecDeque::with_capacity(ONSET_HISTORY),
            silence_rms: 10f32.powf(config.analysis.silence_db / 20.0),
            min_onset_gap: (blocks_per_gap.ceil() as u64).max(1),
            ticks: 0,
            last_onset: None,
            is_onset: false,
        })
    }

    /// Number of spectrum bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.fft.bins()
    }

    fn update_onset(&mut self, novelty: f32) {
        let mean = if self.novelty.is_empty() {
            0.0
        } else {
            self.novelty.iter().sum::<f32>() / self.novelty.len() as f32
        };
        let ticks = self.ticks;
        let gap_ok = self
            .last_onset
            .is_none_or(|t| ticks - t >= self.min_onset_gap);

        self.is_onset = ticks > ONSET_WARMUP_TICKS
            && self.raw.rms > self.silence_rms
            && novelty > ONSET_NOVELTY_MIN
            && novelty > ONSET_RATIO * mean
            && gap_ok;
        if self.is_onset {
            self.last_onset = Some(ticks);
        }

        if self.novelty.len() == ONSET_HISTORY {
            self.novelty.pop_front();
        }
        self.novelty.push_back(novelty);
    }
}

impl FeatureAnalyzer for SpectralAnalyzer {
    fn name(&self) -> &'static str {
        "spectral"
    }

    fn features(&self) -> Vec<FeatureSpec> {
        let mut specs: Vec<FeatureSpec> = SCALARS.iter().map(|&n| FeatureSpec::scalar(n)).collect();
        specs.extend(NORMS.iter().map(|&n| FeatureSpec::scalar(n)));
        specs.push(FeatureSpec::flag("isOnset"));
        specs.push(FeatureSpec::vector("melBands", MEL_BANDS));
        specs.push(FeatureSpec::vector("mfcc", MFCC_COEFFS));
        specs.push(FeatureSpec::vector("tristimulus", 3));
        specs.push(FeatureSpec::vector("spectrum", self.bins()));
        specs.push(FeatureSpec::vector("hpcp", HPCP_BINS));
        specs
    }

    fn consume(&mut self, frame: &AudioFrame<'_>, _emit: &mut dyn FnMut(AnalyzerEvent)) {
        self.ticks += 1;
        frame.copy_channel_into(self.channel, &mut self.block);
        self.pitch_history.push(&self.block);
        let sample_rate = frame.sample_rate() as f32;
        let bin_hz = self.bin_hz;
        let raw = &mut self.raw;

        // Temporal
        raw.power = self.block.iter().map(|x| x * x).sum::<f32>() / self.block.len().max(1) as f32;
        raw.rms = raw.power.sqrt();
        raw.strong_decay = strong_decay(&self.block, sample_rate);

        let pitch = if self.pitch_history.is_full() {
            self.yin.estimate(self.pitch_history.as_slice())
        } else {
            PitchEstimate::default()
        };
        raw.pitch_freq = pitch.freq;
        raw.pitch_conf = pitch.confidence;

        // Spectral
        let mag = self.fft.process(&self.block);
        raw.spectrum.copy_from_slice(mag);
        raw.hfc = mag
            .iter()
            .enumerate()
            .map(|(k, &m)| k as f32 * m * m)
            .sum();
        raw.centroid = centroid(mag, bin_hz);
        raw.roll_off = roll_off(mag, bin_hz, ROLL_OFF_CUTOFF);
        raw.strong_peak = strong_peak(mag);
        raw.pitch_salience = pitch_salience(mag, self.salience_lags);

        peaks::find_peaks(mag, bin_hz, PEAK_THRESHOLD, MAX_PEAKS, &mut self.peaks);
        raw.spec_comp = self.peaks.len() as f32;
        raw.dissonance = peaks::dissonance(&self.peaks);
        peaks::harmonic_peaks(&self.peaks, raw.pitch_freq, HARMONIC_TOLERANCE, &mut self.harmonics);
        raw.tristimulus = peaks::tristimulus(&self.harmonics);
        raw.odd_to_even = peaks::odd_to_even(&self.harmonics);
        raw.inharmonicity = peaks::inharmonicity(&self.harmonics, raw.pitch_freq);

        self.mel.compute(mag, &mut raw.mel_bands);
        self.mfcc.compute(&raw.mel_bands, &mut raw.mfcc);
        hpcp(&self.peaks, &mut raw.hpcp);

        let novelty = onset_novelty(mag, &self.prev_mag, raw.hfc, self.prev_hfc);
        self.prev_mag.copy_from_slice(mag);
        self.prev_hfc = raw.hfc;
        self.update_onset(novelty);

        self.out.smooth_from(&self.raw, &self.smoother);
        self.smoother.commit();
    }

    fn latest(&self, out: &mut FeatureWriter<'_>) {
        let d = &self.out;
        for (name, value) in SCALARS.iter().zip(d.scalars()) {
            out.scalar(name, value);
        }
        let n = &self.norm;
        let norms = [
            n.pitch_freq.normalize(d.pitch_freq),
            n.hfc.normalize(d.hfc),
            n.spec_comp.normalize(d.spec_comp),
            n.centroid.normalize(d.centroid),
            n.roll_off.normalize(d.roll_off),
            n.odd_to_even.normalize(d.odd_to_even),
            n.strong_peak.normalize(d.strong_peak),
            n.strong_decay.normalize(d.strong_decay),
        ];
        for (name, value) in NORMS.iter().zip(norms) {
            out.scalar(name, value);
        }
        out.flag("isOnset", self.is_onset);
        out.vector("melBands", &d.mel_bands);
        out.vector("mfcc", &d.mfcc);
        out.vector("tristimulus", &d.tristimulus);
        out.vector("spectrum", &d.spectrum);
        out.vector("hpcp", &d.hpcp);
    }

    fn retune(&mut self, tuning: &Tuning) {
        self.smoother.set_amount(tuning.smoothing);
        self.norm = tuning.normalization.clone();
    }
}

/// Magnitude-weighted mean frequency, in Hz.
fn centroid(mag: &[f32], bin_hz: f32) -> f32 {
    let (mut num, mut den) = (0.0f32, 0.0f32);
    for (k, &m) in mag.iter().enumerate() {
        num += k as f32 * bin_hz * m;
        den += m;
    }
    if den <= f32::EPSILON { 0.0 } else { num / den }
}

/// Frequency below which `cutoff` of the spectral energy lies.
fn roll_off(mag: &[f32], bin_hz: f32, cutoff: f32) -> f32 {
    let total: f32 = mag.iter().map(|m| m * m).sum();
    if total <= f32::EPSILON {
        return 0.0;
    }
    let target = total * cutoff;
    let mut acc = 0.0f32;
    for (k, &m) in mag.iter().enumerate() {
        acc += m * m;
        if acc >= target {
            return k as f32 * bin_hz;
        }
    }
    mag.len().saturating_sub(1) as f32 * bin_hz
}

/// Height of the strongest peak over its width (in bins) at half height.
fn strong_peak(mag: &[f32]) -> f32 {
    let Some((peak, &max)) = mag.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)) else {
        return 0.0;
    };
    if max <= f32::EPSILON {
        return 0.0;
    }
    let half = max * 0.5;
    let lo = mag[..peak].iter().rposition(|&m| m < half).map_or(0, |i| i + 1);
    let hi = mag[peak..]
        .iter()
        .position(|&m| m < half)
        .map_or(mag.len(), |i| peak + i);
    max / (hi - lo).max(1) as f32
}

/// `sqrt(energy / temporal centroid)`, centroid in seconds.
fn strong_decay(block: &[f32], sample_rate: f32) -> f32 {
    let (mut energy, mut num, mut den) = (0.0f32, 0.0f32, 0.0f32);
    for (i, &x) in block.iter().enumerate() {
        energy += x * x;
        num += i as f32 * x.abs();
        den += x.abs();
    }
    if den <= f32::EPSILON || sample_rate <= 0.0 {
        return 0.0;
    }
    let centroid = num / den / sample_rate;
    if centroid <= f32::EPSILON {
        return 0.0;
    }
    (energy / centroid).sqrt()
}

/// Highest autocorrelation of the spectrum over the lag range, relative to lag 0.
fn pitch_salience(mag: &[f32], (lag_min, lag_max): (usize, usize)) -> f32 {
    let r0: f32 = mag.iter().map(|m| m * m).sum();
    if r0 <= f32::EPSILON {
        return 0.0;
    }
    let lag_max = lag_max.min(mag.len().saturating_sub(1));
    let mut best = 0.0f32;
    for lag in lag_min..=lag_max {
        let r: f32 = mag.iter().zip(&mag[lag..]).map(|(a, b)| a * b).sum();
        best = best.max(r);
    }
    (best / r0).clamp(0.0, 1.0)
}

/// Mean of relative spectral flux and relative HFC rise, in `[0, 1]`.
fn onset_novelty(mag: &[f32], prev: &[f32], hfc: f32, prev_hfc: f32) -> f32 {
    let total: f32 = mag.iter().sum();
    let flux = if total > f32::EPSILON {
        mag.iter()
            .zip(prev)
            .map(|(m, p)| (m - p).max(0.0))
            .sum::<f32>()
            / total
    } else {
        0.0
    };
    let rise = if hfc > f32::EPSILON {
        ((hfc - prev_hfc) / hfc).max(0.0)
    } else {
        0.0
    };
    0.5 * (flux.min(1.0) + rise.min(1.0))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tc_core::feature::{FeatureCatalog, FeatureSnapshot};

    use super::*;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.audio.channels = 1;
        config
    }

    fn snapshot(a: &SpectralAnalyzer, tick: u64) -> FeatureSnapshot {
        let mut catalog = FeatureCatalog::default();
        for spec in a.features() {
            catalog.push("essentia", spec).unwrap();
        }
        let mut values = Vec::new();
        a.latest(&mut FeatureWriter::new(&catalog, &mut values, 1e-6));
        FeatureSnapshot::new(tick, Arc::new(catalog), values)
    }

    fn feed(a: &mut SpectralAnalyzer, tick: u64, block: &[f32]) {
        let frame = AudioFrame::new(block, 1, 44100, tick);
        a.consume(&frame, &mut |_| {});
    }

    fn sine_block(freq: f32, tick: u64, amp: f32) -> Vec<f32> {
        (0..512)
            .map(|i| {
                let t = (tick as usize * 512 + i) as f32 / 44100.0;
                amp * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    fn scalar(s: &FeatureSnapshot, name: &str) -> f32 {
        s.get(name).and_then(|v| v.as_scalar()).unwrap()
    }

    #[test]
    fn declares_full_catalog_shape() {
        let a = SpectralAnalyzer::new(&config()).unwrap();
        let specs = a.features();
        assert_eq!(specs.len(), 14 + 8 + 1 + 5);
        assert_eq!(specs[0].name, "rms");
        assert_eq!(specs[22].name, "isOnset");
        assert!(specs.contains(&FeatureSpec::vector("spectrum", 257)));
    }

    #[test]
    fn silence_stays_at_floor() {
        let mut a = SpectralAnalyzer::new(&config()).unwrap();
        let zeros = [0.0f32; 512];
        for tick in 0..10 {
            feed(&mut a, tick, &zeros);
        }
        let snap = snapshot(&a, 9);
        for name in ["rms", "power", "hfc", "centroid", "rollOff", "pitchFreq", "specComp"] {
            assert_eq!(scalar(&snap, name), 0.0, "{name}");
        }
        assert_eq!(snap.get("isOnset").unwrap().as_flag(), Some(false));
        for (decl, value) in snap.iter() {
            assert!(value.is_finite(), "{} is not finite", decl.name);
            assert!(value.matches(decl.kind));
        }
    }

    #[test]
    fn steady_tone_tracks_pitch_without_onsets() {
        let mut a = SpectralAnalyzer::new(&config()).unwrap();
        for tick in 0..20 {
            feed(&mut a, tick, &sine_block(440.0, tick, 0.5));
            assert!(!snapshot(&a, tick).get("isOnset").unwrap().as_flag().unwrap());
        }
        let snap = snapshot(&a, 19);
        let pitch = scalar(&snap, "pitchFreq");
        assert!((pitch - 440.0).abs() < 3.0, "pitch = {pitch}");
        assert!(scalar(&snap, "pitchConf") > 0.8);
        assert!((scalar(&snap, "rms") - 0.5 / 2f32.sqrt()).abs() < 0.01);
        let norm = scalar(&snap, "pitchFreqNorm");
        assert!((norm - pitch / 4186.0).abs() < 1e-4);
        let hpcp = snap.get("hpcp").unwrap().as_vector().unwrap();
        assert_eq!(hpcp[0], 1.0);
    }

    #[test]
    fn attack_after_silence_is_an_onset() {
        let mut a = SpectralAnalyzer::new(&config()).unwrap();
        let zeros = [0.0f32; 512];
        for tick in 0..10 {
            feed(&mut a, tick, &zeros);
        }
        feed(&mut a, 10, &sine_block(1000.0, 10, 0.8));
        assert_eq!(snapshot(&a, 10).get("isOnset").unwrap().as_flag(), Some(true));
        // cooldown
        feed(&mut a, 11, &sine_block(3000.0, 11, 0.8));
        assert_eq!(snapshot(&a, 11).get("isOnset").unwrap().as_flag(), Some(false));
    }

    #[test]
    fn retune_changes_smoothing_and_ranges() {
        let mut a = SpectralAnalyzer::new(&config()).unwrap();
        feed(&mut a, 0, &[0.0; 512]);
        let tuning = Tuning {
            smoothing: 0.9,
            normalization: NormalizationConfig {
                hfc: tc_core::scale::NormRange::new(0.0, 0.0),
                ..NormalizationConfig::default()
            },
            ..Tuning::default()
        };
        a.retune(&tuning);
        feed(&mut a, 1, &sine_block(440.0, 1, 0.5));
        let snap = snapshot(&a, 1);
        // 10 % of the step
        assert!(scalar(&snap, "rms") < 0.05);
        assert_eq!(scalar(&snap, "hfcNorm"), 0.0);
    }

    #[test]
    fn rejects_missing_channel() {
        let mut config = config();
        config.analysis.channel = 1;
        assert!(SpectralAnalyzer::new(&config).is_err());
    }

    #[test]
    fn descriptor_helpers() {
        let mut mag = vec![0.0f32; 16];
        mag[4] = 1.0;
        assert_eq!(centroid(&mag, 10.0), 40.0);
        assert_eq!(roll_off(&mag, 10.0, 0.85), 40.0);
        assert_eq!(strong_peak(&mag), 1.0);
        assert_eq!(strong_decay(&[0.0; 8], 44100.0), 0.0);
        assert!(onset_novelty(&mag, &[0.0; 16], 16.0, 0.0) > 0.99);
        assert_eq!(onset_novelty(&mag, &mag, 16.0, 16.0), 0.0);
    }
}
