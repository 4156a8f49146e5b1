//! Blocked GEMM micro-kernels over packed operands.
//!
//! One generic implementation covers every dtype and register width: rows
//! iterate in greedy 8/4/2/1 blocks, columns in packed tiles plus one
//! reduced-width tail, K innermost. The tail blocks run the identical
//! algorithm at a smaller width, so results do not depend on M, N or K
//! being multiples of the block sizes. Accumulation is f32 regardless of
//! the element type; the accumulation order is the block-traversal order,
//! deterministic for fixed inputs and tile geometry.
//!
//! Two flavors cover the two operand situations:
//! - [`gemm_packed`]: packed LHS (a prepared kernel/weight matrix), bias per
//!   output **row** — the convolution orientation.
//! - [`gemm_a0b1`]: unpacked row-major LHS (activations), packed RHS, bias
//!   per output **column** — the fully-connected/matmul orientation.

pub mod int8;
pub mod reference;

use reikna_core::Element;

use crate::pack::{row_blocks, PackedA, PackedB};

/// Upper bound on rows-per-block × tile width, sized for the widest
/// geometry ([`crate::capability::gemm_tiles`] caps widths at 32).
const ACC_TILE: usize = 8 * 32;

/// `C[m, n] = A @ B + bias[m]`, with A pre-packed into row blocks.
///
/// `dst` is row-major `[m, n]`. Caller contract: `a.k == b.k` and the
/// operand shapes match `dst`.
pub fn gemm_packed<E: Element>(
    dst: &mut [E],
    a: &PackedA<E>,
    b: &PackedB<E>,
    bias: Option<&[f32]>,
) {
    debug_assert_eq!(a.k, b.k);
    debug_assert_eq!(dst.len(), a.m * b.n);
    debug_assert!(a.m_block * b.width <= ACC_TILE);

    let (k, n) = (a.k, b.n);
    let mut acc = [0f32; ACC_TILE];

    for (row0, rows, ablock) in a.blocks() {
        for t in 0..b.tile_count() {
            let (col0, w, btile) = b.tile(t);
            for i in 0..rows {
                let init = bias.map_or(0.0, |bv| bv[row0 + i]);
                acc[i * w..(i + 1) * w].fill(init);
            }
            for kk in 0..k {
                let arow = &ablock[kk * rows..(kk + 1) * rows];
                let brow = &btile[kk * w..(kk + 1) * w];
                for i in 0..rows {
                    let av = arow[i].to_f32();
                    let out = &mut acc[i * w..(i + 1) * w];
                    for j in 0..w {
                        out[j] += av * brow[j].to_f32();
                    }
                }
            }
            for i in 0..rows {
                let src = &acc[i * w..(i + 1) * w];
                let out = &mut dst[(row0 + i) * n + col0..(row0 + i) * n + col0 + w];
                for j in 0..w {
                    out[j] = E::from_f32(src[j]);
                }
            }
        }
    }
}

/// `C[m, n] = A @ B + bias[n]`, with A read row-major and B pre-packed.
pub fn gemm_a0b1<E: Element>(
    dst: &mut [E],
    a: &[E],
    m: usize,
    b: &PackedB<E>,
    bias: Option<&[f32]>,
) {
    let (k, n) = (b.k, b.n);
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(dst.len(), m * n);

    let mut acc = [0f32; ACC_TILE];

    for (row0, rows) in row_blocks(m, 8) {
        for t in 0..b.tile_count() {
            let (col0, w, btile) = b.tile(t);
            for i in 0..rows {
                match bias {
                    Some(bv) => acc[i * w..(i + 1) * w].copy_from_slice(&bv[col0..col0 + w]),
                    None => acc[i * w..(i + 1) * w].fill(0.0),
                }
            }
            for kk in 0..k {
                let brow = &btile[kk * w..(kk + 1) * w];
                for i in 0..rows {
                    let av = a[(row0 + i) * k + kk].to_f32();
                    let out = &mut acc[i * w..(i + 1) * w];
                    for j in 0..w {
                        out[j] += av * brow[j].to_f32();
                    }
                }
            }
            for i in 0..rows {
                let src = &acc[i * w..(i + 1) * w];
                let out = &mut dst[(row0 + i) * n + col0..(row0 + i) * n + col0 + w];
                for j in 0..w {
                    out[j] = E::from_f32(src[j]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::reference::{gemm_ref, gemm_ref_bias_cols};
    use super::*;
    use crate::pack::{pack_a, pack_b};
    use half::f16;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn rng() -> StdRng {
        StdRng::seed_from_u64(1234)
    }

    fn random_vec(rng: &mut StdRng, len: usize) -> Vec<f32> {
        (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn packed_gemm_matches_reference_f32() {
        let mut rng = rng();
        for &(m, k, n) in &[
            (1usize, 1usize, 1usize),
            (8, 16, 12),
            (13, 7, 29),
            (5, 31, 4),
            (17, 24, 18),
        ] {
            let a = random_vec(&mut rng, m * k);
            let b = random_vec(&mut rng, k * n);
            let bias = random_vec(&mut rng, m);

            let mut expect = vec![0.0f32; m * n];
            gemm_ref(&mut expect, &a, &b, Some(&bias), m, k, n);

            for &w in &[4usize, 8, 12, 16] {
                let pa = pack_a(&a, m, k, 8);
                let pb = pack_b(&b, k, n, w);
                let mut got = vec![0.0f32; m * n];
                gemm_packed(&mut got, &pa, &pb, Some(&bias));
                for i in 0..m * n {
                    let rel = (got[i] - expect[i]).abs() / expect[i].abs().max(1.0);
                    assert!(rel < 1e-5, "m={} k={} n={} w={} idx={}", m, k, n, w, i);
                }
            }
        }
    }

    #[test]
    fn a0b1_gemm_matches_reference_f32() {
        let mut rng = rng();
        for &(m, k, n) in &[(1usize, 8usize, 5usize), (9, 13, 21), (16, 32, 12)] {
            let a = random_vec(&mut rng, m * k);
            let b = random_vec(&mut rng, k * n);
            let bias = random_vec(&mut rng, n);

            let mut expect = vec![0.0f32; m * n];
            gemm_ref_bias_cols(&mut expect, &a, &b, Some(&bias), m, k, n);

            let pb = pack_b(&b, k, n, 12);
            let mut got = vec![0.0f32; m * n];
            gemm_a0b1(&mut got, &a, m, &pb, Some(&bias));
            for i in 0..m * n {
                let rel = (got[i] - expect[i]).abs() / expect[i].abs().max(1.0);
                assert!(rel < 1e-5, "idx {}", i);
            }
        }
    }

    #[test]
    fn f16_gemm_within_half_precision_tolerance() {
        let mut rng = rng();
        let (m, k, n) = (6, 20, 10);
        let a32 = random_vec(&mut rng, m * k);
        let b32 = random_vec(&mut rng, k * n);

        let mut expect = vec![0.0f32; m * n];
        gemm_ref(&mut expect, &a32, &b32, None, m, k, n);

        let a16: Vec<f16> = a32.iter().map(|&v| f16::from_f32(v)).collect();
        let b16: Vec<f16> = b32.iter().map(|&v| f16::from_f32(v)).collect();
        let pa = pack_a(&a16, m, k, 8);
        let pb = pack_b(&b16, k, n, 16);
        let mut got = vec![f16::ZERO; m * n];
        gemm_packed(&mut got, &pa, &pb, None);

        for i in 0..m * n {
            let rel = (got[i].to_f32() - expect[i]).abs() / expect[i].abs().max(1.0);
            assert!(rel < 1e-2, "idx {} got {} expect {}", i, got[i], expect[i]);
        }
    }

    #[test]
    fn no_bias_means_zero_init() {
        let a = vec![1.0f32, 2.0];
        let b = vec![3.0f32, 4.0];
        let pa = pack_a(&a, 1, 2, 8);
        let pb = pack_b(&b, 2, 1, 4);
        let mut got = vec![0.0f32; 1];
        gemm_packed(&mut got, &pa, &pb, None);
        assert_eq!(got[0], 11.0);
    }
}
