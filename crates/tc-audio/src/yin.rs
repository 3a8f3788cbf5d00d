use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

/// Result of one pitch estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PitchEstimate {
    /// Fundamental frequency in Hz, 0 when nothing periodic was found.
    pub freq: f32,
    /// Periodicity in [0, 1] (1 - normalized difference at the chosen lag).
    pub confidence: f32,
}

/// YIN fundamental-frequency estimator with an FFT-computed difference function.
///
/// All buffers are sized at construction; `estimate` does not allocate.
///
/// # Example
/// ```
/// use tc_audio::yin::Yin;
/// let sr = 44100;
/// let x: Vec<f32> = (0..2048)
///     .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sr as f32).sin())
///     .collect();
/// let mut yin = Yin::new(2048, sr, 40.0, 4200.0, 0.15);
/// let est = yin.estimate(&x);
/// assert!((est.freq - 220.0).abs() < 1.0);
/// assert!(est.confidence > 0.9);
/// ```
pub struct Yin {
    len: usize,
    sample_rate: f32,
    threshold: f32,
    tau_min: usize,
    tau_max: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    padded: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch_fwd: Vec<Complex<f32>>,
    scratch_inv: Vec<Complex<f32>>,
    acf: Vec<f32>,
    energy: Vec<f64>,
    cmnd: Vec<f32>,
}

impl Yin {
    /// Estimator over windows of `len` samples, searching `[min_freq, max_freq]`.
    /// Windows shorter than 8 samples are widened to 8.
    #[must_use]
    pub fn new(len: usize, sample_rate: u32, min_freq: f32, max_freq: f32, threshold: f32) -> Self {
        let len = len.max(8);
        let sr = sample_rate as f32;
        let tau_max = ((sr / min_freq.max(1.0)).ceil() as usize).clamp(4, len / 2);
        let tau_min = ((sr / max_freq.max(1.0)).floor() as usize).clamp(2, tau_max - 1);

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(2 * len);
        let inverse = planner.plan_fft_inverse(2 * len);

        Self {
            len,
            sample_rate: sr,
            threshold,
            tau_min,
            tau_max,
            padded: forward.make_input_vec(),
            spectrum: forward.make_output_vec(),
            scratch_fwd: forward.make_scratch_vec(),
            scratch_inv: inverse.make_scratch_vec(),
            acf: inverse.make_output_vec(),
            energy: vec![0.0; len + 1],
            cmnd: vec![1.0; tau_max + 1],
            forward,
            inverse,
        }
    }

    /// Window length in samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if the window is empty (never, kept for API symmetry).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Estimate the pitch of `x` (zero-padded or truncated to the window length).
    pub fn estimate(&mut self, x: &[f32]) -> PitchEstimate {
        let n = self.len;
        self.padded.fill(0.0);
        let used = n.min(x.len());
        self.padded[..used].copy_from_slice(&x[..used]);

        self.energy[0] = 0.0;
        for i in 0..n {
            let s = f64::from(self.padded[i]);
            self.energy[i + 1] = self.energy[i] + s * s;
        }
        if self.energy[n] < 1e-10 {
            return PitchEstimate::default();
        }

        // Linear autocorrelation through |X|² of the zero-padded window
        if self
            .forward
            .process_with_scratch(&mut self.padded, &mut self.spectrum, &mut self.scratch_fwd)
            .is_err()
        {
            return PitchEstimate::default();
        }
        for c in &mut self.spectrum {
            *c = Complex::new(c.re * c.re + c.im * c.im, 0.0);
        }
        if self
            .inverse
            .process_with_scratch(&mut self.spectrum, &mut self.acf, &mut self.scratch_inv)
            .is_err()
        {
            return PitchEstimate::default();
        }
        let scale = 1.0 / (2 * n) as f64;

        // Cumulative mean normalized difference
        self.cmnd[0] = 1.0;
        let mut running = 0.0f64;
        for tau in 1..=self.tau_max {
            let head = self.energy[n - tau];
            let tail = self.energy[n] - self.energy[tau];
            let acf = f64::from(self.acf[tau]) * scale;
            let overlap = (n - tau) as f64;
            let d = ((head + tail - 2.0 * acf).max(0.0)) * n as f64 / overlap;
            running += d;
            self.cmnd[tau] = if running > 0.0 {
                (d * tau as f64 / running) as f32
            } else {
                1.0
            };
        }

        let Some(tau) = self.pick_lag() else {
            return PitchEstimate::default();
        };
        let confidence = (1.0 - self.cmnd[tau]).clamp(0.0, 1.0);
        let refined = self.refine(tau);
        if refined <= 0.0 {
            return PitchEstimate::default();
        }
        PitchEstimate {
            freq: self.sample_rate / refined,
            confidence,
        }
    }

    /// First dip under the threshold, followed to its local minimum; else the global minimum.
    fn pick_lag(&self) -> Option<usize> {
        let range = self.tau_min..self.tau_max;
        let mut tau = self.tau_min;
        while tau < self.tau_max {
            if self.cmnd[tau] < self.threshold {
                while tau + 1 < self.tau_max && self.cmnd[tau + 1] < self.cmnd[tau] {
                    tau += 1;
                }
                return Some(tau);
            }
            tau += 1;
        }
        range.min_by(|&a, &b| self.cmnd[a].total_cmp(&self.cmnd[b]))
    }

    /// Parabolic interpolation of the lag around `tau`.
    fn refine(&self, tau: usize) -> f32 {
        if tau < 1 || tau + 1 > self.tau_max {
            return tau as f32;
        }
        let (a, b, c) = (self.cmnd[tau - 1], self.cmnd[tau], self.cmnd[tau + 1]);
        let denom = a - 2.0 * b + c;
        if denom.abs() <= f32::EPSILON {
            return tau as f32;
        }
        tau as f32 + (0.5 * (a - c) / denom).clamp(-1.0, 1.0)
    }
}

/// Frequency in Hz to (fractional) MIDI note number.
#[inline]
#[must_use]
pub fn hz_to_midi(freq: f32) -> f32 {
    if freq <= 0.0 {
        return 0.0;
    }
    69.0 + 12.0 * (freq / 440.0).log2()
}

/// MIDI note number to frequency in Hz.
#[inline]
#[must_use]
pub fn midi_to_hz(note: f32) -> f32 {
    440.0 * 2f32.powf((note - 69.0) / 12.0)
}
