use realfft::RealFftPlanner;

/// FFT pipeline: windowed real FFT using realfft.
///
/// Pre-allocates the FFT plan, scratch and output buffers for a zero-allocation
/// hot path. The Hann window is scaled to unit area (sum = 2) so a sinusoid of
/// amplitude `A` centred on a bin reads `A` in the magnitude spectrum.
///
/// # Example
/// ```
/// use tc_audio::fft::FftPipeline;
/// let fft = FftPipeline::new(512);
/// assert_eq!(fft.bins(), 257);
/// ```
pub struct FftPipeline {
    fft_size: usize,
    input_buf: Vec<f32>,
    spectrum_buf: Vec<realfft::num_complex::Complex<f32>>,
    scratch: Vec<realfft::num_complex::Complex<f32>>,
    plan: std::sync::Arc<dyn realfft::RealToComplex<f32>>,
    /// Normalized Hann window coefficients.
    window: Vec<f32>,
    magnitude: Vec<f32>,
}

impl FftPipeline {
    /// Create a new FFT pipeline with the given window size (at least 2).
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(2);

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);

        let input_buf = plan.make_input_vec();
        let spectrum_buf = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        let magnitude = vec![0.0; spectrum_buf.len()];

        // Periodic Hann, then unit-area scaling
        let mut window: Vec<f32> = (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
            .collect();
        let sum: f32 = window.iter().sum();
        if sum > 0.0 {
            let scale = 2.0 / sum;
            for w in &mut window {
                *w *= scale;
            }
        }

        Self {
            fft_size: size,
            input_buf,
            spectrum_buf,
            scratch,
            plan,
            window,
            magnitude,
        }
    }

    /// Process `samples` through windowed FFT.
    ///
    /// Missing samples are zero-padded. Returns the magnitude spectrum
    /// (N/2+1 bins), valid until the next call.
    ///
    /// # Example
    /// ```
    /// use tc_audio::fft::FftPipeline;
    /// let mut fft = FftPipeline::new(256);
    /// let samples = vec![0.0f32; 256];
    /// let spectrum = fft.process(&samples);
    /// assert_eq!(spectrum.len(), 129); // N/2 + 1
    /// assert!(spectrum.iter().all(|&m| m == 0.0));
    /// ```
    pub fn process(&mut self, samples: &[f32]) -> &[f32] {
        let n = self.fft_size.min(samples.len());

        for (i, slot) in self.input_buf.iter_mut().enumerate() {
            *slot = if i < n {
                samples[i] * self.window[i]
            } else {
                0.0
            };
        }

        if self
            .plan
            .process_with_scratch(&mut self.input_buf, &mut self.spectrum_buf, &mut self.scratch)
            .is_err()
        {
            self.magnitude.fill(0.0);
            return &self.magnitude;
        }

        for (m, c) in self.magnitude.iter_mut().zip(self.spectrum_buf.iter()) {
            *m = (c.re * c.re + c.im * c.im).sqrt();
        }
        &self.magnitude
    }

    /// Last magnitude spectrum computed.
    #[must_use]
    pub fn magnitude(&self) -> &[f32] {
        &self.magnitude
    }

    /// FFT window size.
    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of output bins (N/2+1).
    #[must_use]
    pub fn bins(&self) -> usize {
        self.magnitude.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centred_sine_reads_its_amplitude() {
        let n = 512;
        let bin = 16.0;
        let samples: Vec<f32> = (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * bin * i as f32 / n as f32).sin())
            .collect();
        let mut fft = FftPipeline::new(n);
        let mag = fft.process(&samples);
        let (peak_bin, peak) = mag
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |acc, (i, &m)| if m > acc.1 { (i, m) } else { acc });
        assert_eq!(peak_bin, 16);
        assert!((peak - 0.5).abs() < 0.01, "peak = {peak}");
    }

    #[test]
    fn zero_size_falls_back_to_two() {
        let mut fft = FftPipeline::new(0);
        assert_eq!(fft.fft_size(), 2);
        assert_eq!(fft.bins(), 2);
        assert!(fft.process(&[1.0]).iter().all(|m| m.is_finite()));
    }
}
