/// One spectral peak, frequency refined by parabolic interpolation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Peak {
    /// Frequency in Hz.
    pub freq: f32,
    /// Linear magnitude.
    pub mag: f32,
}

/// Find local maxima of `mag` above `threshold`.
///
/// Keeps the `max_peaks` strongest, returned in ascending frequency. `out` is
/// cleared and reused; with enough capacity this does not allocate.
///
/// # Example
/// ```
/// use tc_audio::peaks::find_peaks;
/// let mag = [0.0, 1.0, 0.0, 0.0, 0.5, 0.0];
/// let mut peaks = Vec::new();
/// find_peaks(&mag, 10.0, 0.1, 8, &mut peaks);
/// assert_eq!(peaks.len(), 2);
/// assert!((peaks[0].freq - 10.0).abs() < 1e-6);
/// assert!((peaks[1].freq - 40.0).abs() < 1e-6);
/// ```
pub fn find_peaks(mag: &[f32], bin_hz: f32, threshold: f32, max_peaks: usize, out: &mut Vec<Peak>) {
    out.clear();
    if mag.len() < 3 {
        return;
    }
    for k in 1..mag.len() - 1 {
        let (l, c, r) = (mag[k - 1], mag[k], mag[k + 1]);
        if c > threshold && c > l && c >= r {
            let denom = l - 2.0 * c + r;
            let offset = if denom.abs() > f32::EPSILON {
                (0.5 * (l - r) / denom).clamp(-0.5, 0.5)
            } else {
                0.0
            };
            let peak_mag = c - 0.25 * (l - r) * offset;
            out.push(Peak {
                freq: (k as f32 + offset) * bin_hz,
                mag: peak_mag.max(c),
            });
        }
    }
    if out.len() > max_peaks {
        out.sort_unstable_by(|a, b| b.mag.total_cmp(&a.mag));
        out.truncate(max_peaks);
    }
    out.sort_unstable_by(|a, b| a.freq.total_cmp(&b.freq));
}

/// Pick, for each harmonic `h*f0` (h = 1..=len), the closest peak within
/// `tolerance * f0`. Missing harmonics are written with zero magnitude.
pub fn harmonic_peaks(peaks: &[Peak], f0: f32, tolerance: f32, out: &mut [Peak]) {
    for (i, slot) in out.iter_mut().enumerate() {
        let target = f0 * (i + 1) as f32;
        *slot = Peak {
            freq: target,
            mag: 0.0,
        };
        if f0 <= 0.0 {
            continue;
        }
        let mut best = f32::MAX;
        for p in peaks {
            let dist = (p.freq - target).abs();
            if dist <= tolerance * f0 && dist < best {
                best = dist;
                *slot = *p;
            }
        }
    }
}

/// Tristimulus: (first harmonic, harmonics 2–4, harmonics 5+) over the total.
#[must_use]
pub fn tristimulus(harmonics: &[Peak]) -> [f32; 3] {
    let total: f32 = harmonics.iter().map(|p| p.mag).sum();
    if total <= f32::EPSILON {
        return [0.0; 3];
    }
    let t1 = harmonics.first().map_or(0.0, |p| p.mag);
    let t2: f32 = harmonics.iter().skip(1).take(3).map(|p| p.mag).sum();
    let t3: f32 = harmonics.iter().skip(4).map(|p| p.mag).sum();
    [t1 / total, t2 / total, t3 / total]
}

/// Upper bound of the odd-to-even ratio when no even harmonic is present.
pub const ODD_TO_EVEN_MAX: f32 = 1000.0;

/// Energy of odd harmonics (1, 3, 5, …) over even ones (2, 4, …).
#[must_use]
pub fn odd_to_even(harmonics: &[Peak]) -> f32 {
    let (mut odd, mut even) = (0.0f32, 0.0f32);
    for (i, p) in harmonics.iter().enumerate() {
        if i % 2 == 0 {
            odd += p.mag * p.mag;
        } else {
            even += p.mag * p.mag;
        }
    }
    if odd <= f32::EPSILON {
        return 0.0;
    }
    if even <= f32::EPSILON {
        return ODD_TO_EVEN_MAX;
    }
    (odd / even).min(ODD_TO_EVEN_MAX)
}

/// Energy-weighted deviation of the harmonics from exact multiples of `f0`.
#[must_use]
pub fn inharmonicity(harmonics: &[Peak], f0: f32) -> f32 {
    if f0 <= 0.0 {
        return 0.0;
    }
    let (mut num, mut den) = (0.0f32, 0.0f32);
    for (i, p) in harmonics.iter().enumerate() {
        if p.mag <= 0.0 {
            continue;
        }
        let e = p.mag * p.mag;
        num += (p.freq - f0 * (i + 1) as f32).abs() * e;
        den += e;
    }
    if den <= f32::EPSILON {
        return 0.0;
    }
    (num / (den * f0)).clamp(0.0, 1.0)
}

/// Sensory dissonance of a peak set (Plomp & Levelt curve, Sethares model).
///
/// 0 for a single partial or silence, grows towards 1 for dense clusters.
#[must_use]
pub fn dissonance(peaks: &[Peak]) -> f32 {
    const X_STAR: f32 = 0.24;
    const S1: f32 = 0.0207;
    const S2: f32 = 18.96;
    const B1: f32 = 3.51;
    const B2: f32 = 5.75;

    let max_mag = peaks.iter().fold(0.0f32, |m, p| m.max(p.mag));
    if peaks.len() < 2 || max_mag <= f32::EPSILON {
        return 0.0;
    }
    let mut total = 0.0f32;
    let mut energy = 0.0f32;
    for (i, a) in peaks.iter().enumerate() {
        let ai = a.mag / max_mag;
        energy += ai * ai;
        for b in &peaks[i + 1..] {
            let aj = b.mag / max_mag;
            let f_min = a.freq.min(b.freq);
            let df = (b.freq - a.freq).abs();
            let s = X_STAR / (S1 * f_min + S2);
            total += ai * aj * ((-B1 * s * df).exp() - (-B2 * s * df).exp());
        }
    }
    if energy <= f32::EPSILON {
        return 0.0;
    }
    (total / energy).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harmonic_series(f0: f32, mags: &[f32]) -> Vec<Peak> {
        mags.iter()
            .enumerate()
            .map(|(i, &mag)| Peak {
                freq: f0 * (i + 1) as f32,
                mag,
            })
            .collect()
    }

    #[test]
    fn keeps_strongest_peaks_in_frequency_order() {
        let mag = [0.0, 0.2, 0.0, 0.9, 0.0, 0.5, 0.0];
        let mut peaks = Vec::with_capacity(4);
        find_peaks(&mag, 1.0, 0.0, 2, &mut peaks);
        assert_eq!(peaks.len(), 2);
        assert!(peaks[0].freq < peaks[1].freq);
        assert!(peaks.iter().all(|p| p.mag >= 0.5));
    }

    #[test]
    fn harmonic_descriptors() {
        let peaks = harmonic_series(100.0, &[1.0, 0.5, 0.5, 0.0, 0.25]);
        let mut h = [Peak::default(); 6];
        harmonic_peaks(&peaks, 100.0, 0.2, &mut h);
        assert_eq!(h[0].mag, 1.0);
        assert_eq!(h[5].mag, 0.0);

        let t = tristimulus(&h);
        assert!((t.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!((t[0] - 1.0 / 2.25).abs() < 1e-6);

        assert!(odd_to_even(&h) > 1.0);
        assert!(inharmonicity(&h, 100.0).abs() < 1e-6);
    }

    #[test]
    fn pure_tone_edge_cases() {
        let mut h = [Peak::default(); 4];
        harmonic_peaks(&harmonic_series(440.0, &[0.8]), 440.0, 0.2, &mut h);
        assert_eq!(odd_to_even(&h), ODD_TO_EVEN_MAX);
        assert_eq!(tristimulus(&[Peak::default(); 3]), [0.0; 3]);
        assert_eq!(dissonance(&harmonic_series(440.0, &[0.8])), 0.0);
    }

    #[test]
    fn close_partials_are_more_dissonant() {
        let close = [
            Peak { freq: 440.0, mag: 1.0 },
            Peak { freq: 466.0, mag: 1.0 },
        ];
        let far = [
            Peak { freq: 440.0, mag: 1.0 },
            Peak { freq: 880.0, mag: 1.0 },
        ];
        assert!(dissonance(&close) > dissonance(&far));
    }
}
