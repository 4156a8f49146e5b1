//! Int8 blocked GEMM with exact int32 accumulation.
//!
//! The integer kernels accumulate to int32 first and requantize as a
//! second pass, keeping the multiply-accumulate loop free of scaling
//! arithmetic. The K dimension walks the packed 4-deep interleave groups;
//! zero-padded tail lanes contribute nothing, so the accumulation is
//! bit-exact against the naive reference.

use reikna_core::RequantParams;

use crate::pack::{row_blocks, PackedAInt8, PackedBInt8};

const ACC_TILE: usize = 8 * 32;

/// `C_i32[m, n] = A @ B + bias[m]`, both operands packed.
pub fn gemm_packed_int8_i32(
    dst: &mut [i32],
    a: &PackedAInt8,
    b: &PackedBInt8,
    bias: Option<&[i32]>,
) {
    debug_assert_eq!(a.k, b.k);
    debug_assert_eq!(dst.len(), a.m * b.n);

    let n = b.n;
    let k_groups = a.k_groups;
    let mut acc = [0i32; ACC_TILE];

    for (row0, rows, ablock) in a.blocks() {
        for t in 0..b.tile_count() {
            let (col0, w, btile) = b.tile(t);
            for i in 0..rows {
                acc[i * w..(i + 1) * w].fill(bias.map_or(0, |bv| bv[row0 + i]));
            }
            for g in 0..k_groups {
                let agrp = &ablock[g * rows * 4..(g + 1) * rows * 4];
                let bgrp = &btile[g * w * 4..(g + 1) * w * 4];
                for i in 0..rows {
                    let al = &agrp[i * 4..i * 4 + 4];
                    let out = &mut acc[i * w..(i + 1) * w];
                    for j in 0..w {
                        let bl = &bgrp[j * 4..j * 4 + 4];
                        out[j] += al[0] as i32 * bl[0] as i32
                            + al[1] as i32 * bl[1] as i32
                            + al[2] as i32 * bl[2] as i32
                            + al[3] as i32 * bl[3] as i32;
                    }
                }
            }
            for i in 0..rows {
                dst[(row0 + i) * n + col0..(row0 + i) * n + col0 + w]
                    .copy_from_slice(&acc[i * w..(i + 1) * w]);
            }
        }
    }
}

/// `C_i8[m, n] = requantize(A @ B + bias[m])`, requantized per output row
/// (the convolution orientation: row = output channel). `channel_base`
/// offsets the per-channel requant index for grouped convolutions, where
/// row 0 of a group GEMM is a later global output channel.
pub fn gemm_packed_int8(
    dst: &mut [i8],
    a: &PackedAInt8,
    b: &PackedBInt8,
    bias: Option<&[i32]>,
    requant: &RequantParams,
    channel_base: usize,
) {
    let (m, n) = (a.m, b.n);
    let mut acc = vec![0i32; m * n];
    gemm_packed_int8_i32(&mut acc, a, b, bias);
    for r in 0..m {
        let row = &acc[r * n..(r + 1) * n];
        let out = &mut dst[r * n..(r + 1) * n];
        for c in 0..n {
            out[c] = requant.apply(row[c], channel_base + r);
        }
    }
}

/// `C_i32[m, n] = A @ B + bias[n]`, A read row-major (activations).
pub fn gemm_a0b1_int8_i32(
    dst: &mut [i32],
    a: &[i8],
    m: usize,
    b: &PackedBInt8,
    bias: Option<&[i32]>,
) {
    let (k, n) = (b.k, b.n);
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(dst.len(), m * n);

    let mut acc = [0i32; ACC_TILE];

    for (row0, rows) in row_blocks(m, 8) {
        for t in 0..b.tile_count() {
            let (col0, w, btile) = b.tile(t);
            for i in 0..rows {
                match bias {
                    Some(bv) => acc[i * w..(i + 1) * w].copy_from_slice(&bv[col0..col0 + w]),
                    None => acc[i * w..(i + 1) * w].fill(0),
                }
            }
            for g in 0..b.k_groups {
                let bgrp = &btile[g * w * 4..(g + 1) * w * 4];
                for i in 0..rows {
                    let arow = &a[(row0 + i) * k..(row0 + i + 1) * k];
                    let mut al = [0i32; 4];
                    for l in 0..4 {
                        let kk = g * 4 + l;
                        if kk < k {
                            al[l] = arow[kk] as i32;
                        }
                    }
                    let out = &mut acc[i * w..(i + 1) * w];
                    for j in 0..w {
                        let bl = &bgrp[j * 4..j * 4 + 4];
                        out[j] += al[0] * bl[0] as i32
                            + al[1] * bl[1] as i32
                            + al[2] * bl[2] as i32
                            + al[3] * bl[3] as i32;
                    }
                }
            }
            for i in 0..rows {
                dst[(row0 + i) * n + col0..(row0 + i) * n + col0 + w]
                    .copy_from_slice(&acc[i * w..(i + 1) * w]);
            }
        }
    }
}

/// `C_i8[m, n] = requantize(A @ B + bias[n])`, requantized per output
/// column (the fully-connected orientation: column = output node).
pub fn gemm_a0b1_int8(
    dst: &mut [i8],
    a: &[i8],
    m: usize,
    b: &PackedBInt8,
    bias: Option<&[i32]>,
    requant: &RequantParams,
) {
    let n = b.n;
    let mut acc = vec![0i32; m * n];
    gemm_a0b1_int8_i32(&mut acc, a, m, b, bias);
    for r in 0..m {
        let row = &acc[r * n..(r + 1) * n];
        let out = &mut dst[r * n..(r + 1) * n];
        for c in 0..n {
            out[c] = requant.apply(row[c], c);
        }
    }
}
