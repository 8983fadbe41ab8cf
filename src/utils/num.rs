//! Numeric utilities: safe and centralized integer conversions.
//!
//! - Fallible conversions (`Option<T>`) where an out of range value must stop the operation,
//!   e.g. an array index or a `$limit` argument.
//! - Saturating conversions where clamping is fine, e.g. sizes and timings reported to logs.

#[inline]
#[must_use]
pub fn i64_to_usize(v: i64) -> Option<usize> {
    usize::try_from(v).ok()
}

#[inline]
#[must_use]
pub fn usize_to_i64_saturating(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[inline]
#[must_use]
pub fn usize_to_u64(v: usize) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

#[inline]
#[must_use]
pub fn u128_to_u64_saturating(v: u128) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

/// Returns the integer value of `v` when it has no fractional part and fits in an `i64`.
#[inline]
#[must_use]
pub fn f64_to_i64_exact(v: f64) -> Option<i64> {
    if !v.is_finite() || v.fract() != 0.0 {
        return None;
    }
    if v < i64::MIN as f64 || v >= i64::MAX as f64 {
        return None;
    }
    Some(v as i64)
}

/// Milliseconds as a float, the unit evaluation stats are recorded in.
#[inline]
#[must_use]
pub fn duration_ms(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i64_to_usize_rejects_negative() {
        assert_eq!(i64_to_usize(-1), None);
        assert_eq!(i64_to_usize(7), Some(7));
    }

    #[test]
    fn f64_exact_conversion() {
        assert_eq!(f64_to_i64_exact(3.0), Some(3));
        assert_eq!(f64_to_i64_exact(-2.0), Some(-2));
        assert_eq!(f64_to_i64_exact(2.5), None);
        assert_eq!(f64_to_i64_exact(f64::NAN), None);
        assert_eq!(f64_to_i64_exact(f64::INFINITY), None);
    }

    #[test]
    fn saturating_edges() {
        assert_eq!(u128_to_u64_saturating(u128::MAX), u64::MAX);
        assert_eq!(usize_to_i64_saturating(usize::MAX), i64::MAX);
        assert_eq!(usize_to_u64(42), 42);
    }

    #[test]
    fn duration_in_ms() {
        let ms = duration_ms(std::time::Duration::from_micros(1500));
        assert!((ms - 1.5).abs() < 1e-9);
    }
}
