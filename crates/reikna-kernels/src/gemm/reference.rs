//! Naive triple-loop GEMM references.
//!
//! The oracles the blocked kernels are tested against, and the arithmetic
//! the hard scalar fallback relies on. Obviously correct beats fast here.

use reikna_core::Element;

/// `C[m, n] = A @ B + bias[m]` (bias per output row).
pub fn gemm_ref<E: Element>(
    dst: &mut [E],
    a: &[E],
    b: &[E],
    bias: Option<&[f32]>,
    m: usize,
    k: usize,
    n: usize,
) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = bias.map_or(0.0, |bv| bv[i]);
            for l in 0..k {
                sum += a[i * k + l].to_f32() * b[l * n + j].to_f32();
            }
            dst[i * n + j] = E::from_f32(sum);
        }
    }
}

/// `C[m, n] = A @ B + bias[n]` (bias per output column).
pub fn gemm_ref_bias_cols<E: Element>(
    dst: &mut [E],
    a: &[E],
    b: &[E],
    bias: Option<&[f32]>,
    m: usize,
    k: usize,
    n: usize,
) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = bias.map_or(0.0, |bv| bv[j]);
            for l in 0..k {
                sum += a[i * k + l].to_f32() * b[l * n + j].to_f32();
            }
            dst[i * n + j] = E::from_f32(sum);
        }
    }
}

/// Exact int32 accumulation: `C[m, n] = A @ B + bias[m]`.
pub fn gemm_ref_int8_i32(
    dst: &mut [i32],
    a: &[i8],
    b: &[i8],
    bias: Option<&[i32]>,
    m: usize,
    k: usize,
    n: usize,
) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = bias.map_or(0, |bv| bv[i]);
            for l in 0..k {
                sum += a[i * k + l] as i32 * b[l * n + j] as i32;
            }
            dst[i * n + j] = sum;
        }
    }
}

/// Exact int32 accumulation with bias per output column.
pub fn gemm_ref_int8_i32_bias_cols(
    dst: &mut [i32],
    a: &[i8],
    b: &[i8],
    bias: Option<&[i32]>,
    m: usize,
    k: usize,
    n: usize,
) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = bias.map_or(0, |bv| bv[j]);
            for l in 0..k {
                sum += a[i * k + l] as i32 * b[l * n + j] as i32;
            }
            dst[i * n + j] = sum;
        }
    }
}
