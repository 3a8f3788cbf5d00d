/// Floor applied to band energies before the log in MFCC.
const LOG_FLOOR: f32 = 1e-10;

#[inline]
fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

#[inline]
fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank over a power spectrum.
///
/// Each triangle is normalized to unit sum, so a band reads the weighted
/// mean power of its bins. Weights are stored sparsely (first bin + run).
///
/// # Example
/// ```
/// use tc_audio::mel::MelBands;
/// let mel = MelBands::new(24, 257, 44100, 0.0, 22050.0);
/// let mut out = [0.0f32; 24];
/// mel.compute(&[0.0; 257], &mut out);
/// assert!(out.iter().all(|&b| b == 0.0));
/// ```
pub struct MelBands {
    filters: Vec<(usize, Vec<f32>)>,
}

impl MelBands {
    /// `n_bands` triangles between `low_hz` and `high_hz` over `bins` spectrum bins.
    #[must_use]
    pub fn new(n_bands: usize, bins: usize, sample_rate: u32, low_hz: f32, high_hz: f32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let bin_hz = nyquist / (bins.saturating_sub(1).max(1)) as f32;
        let high_hz = high_hz.min(nyquist);
        let (mel_lo, mel_hi) = (hz_to_mel(low_hz), hz_to_mel(high_hz));
        let step = (mel_hi - mel_lo) / (n_bands + 1) as f32;
        let edge = |i: usize| mel_to_hz(mel_lo + step * i as f32);

        let filters = (0..n_bands)
            .map(|b| {
                let (lo, mid, hi) = (edge(b), edge(b + 1), edge(b + 2));
                let first = ((lo / bin_hz).ceil() as usize).min(bins.saturating_sub(1));
                let last = ((hi / bin_hz).floor() as usize).min(bins.saturating_sub(1));
                let mut weights: Vec<f32> = (first..=last.max(first))
                    .map(|k| {
                        let f = k as f32 * bin_hz;
                        if f <= mid {
                            (f - lo) / (mid - lo).max(f32::EPSILON)
                        } else {
                            (hi - f) / (hi - mid).max(f32::EPSILON)
                        }
                        .max(0.0)
                    })
                    .collect();
                let sum: f32 = weights.iter().sum();
                if sum > f32::EPSILON {
                    for w in &mut weights {
                        *w /= sum;
                    }
                    (first, weights)
                } else {
                    // Triangle narrower than a bin: take the nearest bin
                    let nearest = ((mid / bin_hz).round() as usize).min(bins.saturating_sub(1));
                    (nearest, vec![1.0])
                }
            })
            .collect();
        Self { filters }
    }

    /// Number of bands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// `true` with zero bands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Band energies of the magnitude spectrum `mag` (squared internally).
    pub fn compute(&self, mag: &[f32], out: &mut [f32]) {
        for (slot, (first, weights)) in out.iter_mut().zip(&self.filters) {
            *slot = weights
                .iter()
                .zip(mag.iter().skip(*first))
                .map(|(w, m)| w * m * m)
                .sum();
        }
    }
}

/// Cepstral coefficients: orthonormal DCT-II of log band energies.
///
/// # Example
/// ```
/// use tc_audio::mel::Mfcc;
/// let mfcc = Mfcc::new(24, 13);
/// let mut out = [0.0f32; 13];
/// mfcc.compute(&[1.0; 24], &mut out);
/// // flat spectrum: all energy in c0
/// assert!(out[1..].iter().all(|c| c.abs() < 1e-4));
/// ```
pub struct Mfcc {
    n_bands: usize,
    dct: Vec<f32>,
}

impl Mfcc {
    /// Keep `n_coeffs` coefficients of an `n_bands` input.
    #[must_use]
    pub fn new(n_bands: usize, n_coeffs: usize) -> Self {
        let n = n_bands as f32;
        let mut dct = Vec::with_capacity(n_bands * n_coeffs);
        for k in 0..n_coeffs {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            for b in 0..n_bands {
                dct.push(
                    scale * (std::f32::consts::PI * k as f32 * (b as f32 + 0.5) / n).cos(),
                );
            }
        }
        Self { n_bands, dct }
    }

    /// Coefficients of `bands` (power, linear) written to `out`.
    pub fn compute(&self, bands: &[f32], out: &mut [f32]) {
        for (k, slot) in out.iter_mut().enumerate() {
            let row = &self.dct[k * self.n_bands..(k + 1) * self.n_bands];
            *slot = row
                .iter()
                .zip(bands)
                .map(|(c, &e)| c * 10.0 * e.max(LOG_FLOOR).log10())
                .sum();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_band_has_weight() {
        let mel = MelBands::new(24, 257, 44100, 0.0, 22050.0);
        assert_eq!(mel.len(), 24);
        for (_, w) in &mel.filters {
            assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn tone_lands_in_matching_band() {
        let mel = MelBands::new(24, 257, 44100, 0.0, 22050.0);
        let mut mag = vec![0.0f32; 257];
        mag[100] = 1.0; // ≈ 8.6 kHz
        let mut low = vec![0.0f32; 257];
        low[3] = 1.0; // ≈ 260 Hz
        let mut hi_bands = [0.0f32; 24];
        let mut lo_bands = [0.0f32; 24];
        mel.compute(&mag, &mut hi_bands);
        mel.compute(&low, &mut lo_bands);
        let argmax = |b: &[f32]| {
            b.iter()
                .enumerate()
                .fold((0, 0.0f32), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
                .0
        };
        assert!(argmax(&hi_bands) > argmax(&lo_bands));
    }

    #[test]
    fn silence_mfcc_is_finite() {
        let mfcc = Mfcc::new(24, 13);
        let mut out = [0.0f32; 13];
        mfcc.compute(&[0.0; 24], &mut out);
        assert!(out.iter().all(|c| c.is_finite()));
        assert!(out[0] < -400.0);
    }
}
