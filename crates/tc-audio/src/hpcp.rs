use crate::peaks::Peak;

/// Reference pitch of chroma bin 0 (A).
const REFERENCE_HZ: f32 = 440.0;
const MIN_HZ: f32 = 40.0;
const MAX_HZ: f32 = 5000.0;
/// Half-width of the weighting window, in semitones.
const WINDOW_SEMITONES: f32 = 1.0;

/// Harmonic pitch-class profile: spectral peaks folded into 12 semitone bins.
///
/// Each peak contributes `mag²` spread over the neighbouring bins with a
/// cos² window one semitone wide. The result is normalized to a maximum of 1,
/// or left at zero when no peak falls in range.
///
/// # Example
/// ```
/// use tc_audio::hpcp::hpcp;
/// use tc_audio::peaks::Peak;
/// let mut chroma = [0.0f32; 12];
/// hpcp(&[Peak { freq: 440.0, mag: 1.0 }], &mut chroma);
/// assert_eq!(chroma[0], 1.0); // A
/// hpcp(&[], &mut chroma);
/// assert!(chroma.iter().all(|&c| c == 0.0));
/// ```
pub fn hpcp(peaks: &[Peak], out: &mut [f32; 12]) {
    out.fill(0.0);
    for p in peaks {
        if p.freq < MIN_HZ || p.freq > MAX_HZ || p.mag <= 0.0 {
            continue;
        }
        let pos = (12.0 * (p.freq / REFERENCE_HZ).log2()).rem_euclid(12.0);
        let energy = p.mag * p.mag;
        let nearest = pos.round();
        for offset in -1i32..=1 {
            let bin = nearest + offset as f32;
            let dist = (pos - bin).abs();
            if dist >= WINDOW_SEMITONES {
                continue;
            }
            let w = (std::f32::consts::FRAC_PI_2 * dist / WINDOW_SEMITONES).cos();
            let idx = (bin as i32).rem_euclid(12) as usize;
            out[idx] += energy * w * w;
        }
    }
    let max = out.iter().fold(0.0f32, |m, &v| m.max(v));
    if max > f32::EPSILON {
        for v in out.iter_mut() {
            *v /= max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octaves_fold_together() {
        let mut a = [0.0f32; 12];
        let mut b = [0.0f32; 12];
        hpcp(&[Peak { freq: 261.63, mag: 0.5 }], &mut a);
        hpcp(&[Peak { freq: 523.25, mag: 0.5 }], &mut b);
        // C is 3 semitones above A
        assert_eq!(a[3], 1.0);
        assert_eq!(b[3], 1.0);
    }

    #[test]
    fn major_triad_marks_three_classes() {
        let mut chroma = [0.0f32; 12];
        let triad = [
            Peak { freq: 261.63, mag: 1.0 },
            Peak { freq: 329.63, mag: 1.0 },
            Peak { freq: 392.00, mag: 1.0 },
        ];
        hpcp(&triad, &mut chroma);
        for class in [3, 7, 10] {
            assert!(chroma[class] > 0.9, "class {class} = {}", chroma[class]);
        }
        assert!(chroma[0] < 0.01);
    }

    #[test]
    fn out_of_range_peaks_are_ignored() {
        let mut chroma = [0.0f32; 12];
        hpcp(&[Peak { freq: 20.0, mag: 1.0 }, Peak { freq: 9000.0, mag: 1.0 }], &mut chroma);
        assert!(chroma.iter().all(|&c| c == 0.0));
    }
}
