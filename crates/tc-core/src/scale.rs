use serde::{Deserialize, Serialize};

/// Linear energy to decibels, with the input floored before the logarithm.
///
/// `20*log10(max(x, floor))`: silence and negative noise never reach `log10(0)`.
///
/// # Example
/// ```
/// use tc_core::scale::lin_to_db;
/// assert_eq!(lin_to_db(0.0, 1e-3), lin_to_db(1e-3, 1e-3));
/// assert!((lin_to_db(1.0, 1e-3)).abs() < 1e-6);
/// assert!((lin_to_db(1e-3, 1e-3) + 60.0).abs() < 1e-3);
/// ```
#[inline]
#[must_use]
pub fn lin_to_db(x: f32, floor: f32) -> f32 {
    // NaN falls through max() to the floor
    20.0 * x.max(floor).log10()
}

/// Display range used to map a raw scalar into `[0, 1]`.
///
/// # Example
/// ```
/// use tc_core::scale::NormRange;
/// let range = NormRange::new(0.0, 200.0);
/// assert_eq!(range.normalize(50.0), 0.25);
/// assert_eq!(range.normalize(-5.0), 0.0);
/// assert_eq!(range.normalize(1e9), 1.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct NormRange {
    /// Value mapped to 0.
    pub min: f32,
    /// Value mapped to 1.
    pub max: f32,
}

impl NormRange {
    /// Range from `min` to `max`.
    #[must_use]
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Map `value` into `[0, 1]`. A degenerate range maps everything to 0.
    #[inline]
    #[must_use]
    pub fn normalize(&self, value: f32) -> f32 {
        let span = self.max - self.min;
        if !span.is_finite() || span <= f32::EPSILON || !value.is_finite() {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_is_clamped_at_floor() {
        let floor: f32 = 1e-6;
        let at_floor = 20.0 * floor.log10();
        for x in [0.0f32, -1.0, 1e-9, floor, f32::NAN] {
            assert!((lin_to_db(x, floor) - at_floor).abs() < 1e-4, "x = {x}");
        }
    }

    #[test]
    fn db_is_monotonic_above_floor() {
        let floor = 1e-6;
        let mut prev = lin_to_db(floor, floor);
        let mut x = floor * 1.5;
        while x < 10.0 {
            let db = lin_to_db(x, floor);
            assert!(db > prev);
            assert!((db - 20.0 * x.log10()).abs() < 1e-3);
            prev = db;
            x *= 1.7;
        }
    }

    #[test]
    fn degenerate_range_is_zero() {
        assert_eq!(NormRange::new(3.0, 3.0).normalize(3.0), 0.0);
        assert_eq!(NormRange::new(0.0, 1.0).normalize(f32::NAN), 0.0);
    }
}
