//! Fixed-point requantization arithmetic for int8 inference.
//!
//! An int8 kernel accumulates exact int32 sums and then scales them back to
//! int8 with a Q31 fixed-point multiplier instead of a float multiply. The
//! `{multiplier, shift}` pair is derived once per channel at operator-prepare
//! time from `scale_in * scale_kernel / scale_out` and is immutable
//! afterwards; only [`requantize`] runs in the hot path.
//!
//! The rounding policy is round-half-up on the shifted-out bits, applied to
//! the full 64-bit product. Saturation clamps to `[-128, 127]`, never wraps.
//! Test vectors are derived against exactly this policy.

/// Splits a double into mantissa and exponent, `x = mant * 2^exp` with
/// `|mant|` in `[0.5, 1.0)`.
fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 {
        return (0.0, 0);
    }
    let bits = x.to_bits();
    let exp_field = ((bits >> 52) & 0x7ff) as i32;
    if exp_field == 0 {
        // Subnormal: scale up by 2^52 and correct the exponent afterwards.
        let (mant, exp) = frexp(x * f64::from_bits(0x4330_0000_0000_0000));
        return (mant, exp - 52);
    }
    let exp = exp_field - 1022;
    let mant = f64::from_bits((bits & !(0x7ffu64 << 52)) | (0x3feu64 << 52));
    (mant, exp)
}

/// Decomposes a real-valued scale into a Q31 fixed-point multiplier and a
/// shift, such that `real ≈ multiplier * 2^(shift - 31)`.
///
/// The multiplier lands in `[2^30, 2^31)` for non-zero inputs. Zero maps to
/// `(0, 0)`. If rounding pushes the mantissa to exactly `2^31` the shift is
/// bumped instead. Scales below roughly `2^-31` flush to zero — a right
/// shift past 31 bits would discard every result bit anyway.
///
/// Pure function; called at weight-quantization time, never in the hot path.
pub fn quantize_multiplier(real: f64) -> (i32, i32) {
    if real == 0.0 {
        return (0, 0);
    }
    let (mant, mut shift) = frexp(real);
    let mut q = (mant * (1i64 << 31) as f64).round() as i64;
    if q == 1i64 << 31 {
        q /= 2;
        shift += 1;
    }
    if shift < -31 {
        return (0, 0);
    }
    (q as i32, shift)
}

/// Arithmetic right shift with round-half-up on the discarded bits.
#[inline(always)]
fn rounding_shift_right(v: i64, shift: i32) -> i64 {
    if shift <= 0 {
        return v << -shift;
    }
    (v + (1i64 << (shift - 1))) >> shift
}

/// Scales an int32 accumulator back to int8.
///
/// Computes `clamp((acc * multiplier) >>round (31 - shift) + zero_point)`
/// in 64-bit, where `{multiplier, shift}` come from [`quantize_multiplier`].
/// Monotone non-decreasing in `acc` for a positive multiplier.
#[inline(always)]
pub fn requantize(acc: i32, multiplier: i32, shift: i32, out_zp: i32) -> i8 {
    let prod = acc as i64 * multiplier as i64;
    let scaled = rounding_shift_right(prod, 31 - shift);
    (scaled + out_zp as i64).clamp(-128, 127) as i8
}

/// Quantizes a real value to int8 with the given scale and zero point.
#[inline]
pub fn quantize(v: f32, scale: f32, zero_point: i32) -> i8 {
    let q = (v / scale).round() as i32 + zero_point;
    q.clamp(-128, 127) as i8
}

/// Recovers the approximate real value of an int8 quantized element.
#[inline]
pub fn dequantize(q: i8, scale: f32, zero_point: i32) -> f32 {
    (q as i32 - zero_point) as f32 * scale
}

/// Per-channel requantization parameters owned by a prepared operator.
///
/// Derived once at prepare time; `multiplier`/`shift` have one entry per
/// output channel, or a single entry when the kernel is quantized per
/// tensor.
#[derive(Debug, Clone)]
pub struct RequantParams {
    pub multiplier: Vec<i32>,
    pub shift: Vec<i32>,
    pub out_zp: i32,
}

impl RequantParams {
    /// Derives the fixed-point parameters from the real scale ratios
    /// `scale_in * scale_kernel[c] / scale_out`.
    pub fn from_scales(scale_in: f32, kernel_scales: &[f32], scale_out: f32, out_zp: i32) -> Self {
        let mut multiplier = Vec::with_capacity(kernel_scales.len());
        let mut shift = Vec::with_capacity(kernel_scales.len());
        for &ks in kernel_scales {
            let real = scale_in as f64 * ks as f64 / scale_out as f64;
            let (m, s) = quantize_multiplier(real);
            multiplier.push(m);
            shift.push(s);
        }
        RequantParams {
            multiplier,
            shift,
            out_zp,
        }
    }

    /// Requantizes one accumulator for the given output channel.
    #[inline(always)]
    pub fn apply(&self, acc: i32, channel: usize) -> i8 {
        let idx = if self.multiplier.len() == 1 { 0 } else { channel };
        requantize(acc, self.multiplier[idx], self.shift[idx], self.out_zp)
    }

    pub fn is_per_channel(&self) -> bool {
        self.multiplier.len() > 1
    }
}
