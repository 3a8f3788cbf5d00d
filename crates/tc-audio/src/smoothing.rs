/// Exponential moving average applied to analyzer outputs.
///
/// `y = amount * y_prev + (1 - amount) * x`. `amount = 0` is a pass-through.
/// The first value seen is taken as is, so a fresh smoother never ramps up
/// from zero.
///
/// # Example
/// ```
/// use tc_audio::smoothing::Smoother;
/// let mut s = Smoother::new(0.5);
/// let mut y = 0.0;
/// s.scalar(&mut y, 4.0);
/// assert_eq!(y, 4.0);
/// s.commit();
/// s.scalar(&mut y, 0.0);
/// assert_eq!(y, 2.0);
/// ```
#[derive(Clone, Debug)]
pub struct Smoother {
    amount: f32,
    primed: bool,
}

impl Smoother {
    /// Create a new smoother. `amount` is clamped to [0.0, 0.999]; a
    /// non-finite amount disables smoothing.
    #[must_use]
    pub fn new(amount: f32) -> Self {
        Self {
            amount: sanitize_amount(amount),
            primed: false,
        }
    }

    /// Change the amount without losing the current state.
    pub fn set_amount(&mut self, amount: f32) {
        self.amount = sanitize_amount(amount);
    }

    /// Current amount.
    #[must_use]
    pub fn amount(&self) -> f32 {
        self.amount
    }

    /// Smooth one value in place.
    #[inline(always)]
    pub fn scalar(&self, state: &mut f32, current: f32) {
        *state = self.blend(*state, current);
    }

    /// Smooth a slice element-wise. `state` and `current` must have the same length.
    pub fn slice(&self, state: &mut [f32], current: &[f32]) {
        for (s, &c) in state.iter_mut().zip(current) {
            *s = self.blend(*s, c);
        }
    }

    /// Mark the end of a tick. The first completed tick primes the smoother.
    pub fn commit(&mut self) {
        self.primed = true;
    }

    #[inline(always)]
    fn blend(&self, previous: f32, current: f32) -> f32 {
        // A non-finite history would stick forever
        if !self.primed || !previous.is_finite() {
            return current;
        }
        self.amount * previous + (1.0 - self.amount) * current
    }
}

fn sanitize_amount(amount: f32) -> f32 {
    if amount.is_finite() { amount.clamp(0.0, 0.999) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_amount_is_passthrough() {
        let mut s = Smoother::new(0.0);
        let mut y = [0.0f32; 3];
        s.slice(&mut y, &[1.0, 2.0, 3.0]);
        s.commit();
        s.slice(&mut y, &[4.0, 5.0, 6.0]);
        assert_eq!(y, [4.0, 5.0, 6.0]);
    }

    #[test]
    fn converges_to_constant_input() {
        let mut s = Smoother::new(0.9);
        let mut y = 0.0;
        s.scalar(&mut y, 0.0);
        s.commit();
        for _ in 0..200 {
            s.scalar(&mut y, 1.0);
        }
        assert!((y - 1.0).abs() < 1e-3);
    }

    #[test]
    fn recovers_from_nan_history() {
        let mut s = Smoother::new(0.5);
        s.commit();
        let mut y = f32::NAN;
        s.scalar(&mut y, 3.0);
        assert_eq!(y, 3.0);
    }

    #[test]
    fn non_finite_amount_disables_smoothing() {
        let mut s = Smoother::new(f32::NAN);
        assert_eq!(s.amount(), 0.0);
        s.set_amount(0.5);
        assert_eq!(s.amount(), 0.5);
        s.set_amount(f32::INFINITY);
        assert_eq!(s.amount(), 0.0);

        let mut y = 1.0;
        s.scalar(&mut y, 2.0);
        s.commit();
        s.scalar(&mut y, 7.0);
        assert_eq!(y, 7.0);
    }
}
