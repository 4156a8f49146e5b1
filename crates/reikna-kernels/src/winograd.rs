//! Winograd convolution for 3x3 stride-1 kernels.
//!
//! F(4,3) computes 4x4 output tiles from 6x6 input tiles, F(6,3) 6x6 from
//! 8x8. The kernel is transformed once at prepare time; each exec transforms
//! input tiles into the same basis, runs one GEMM per basis coefficient
//! across channels, inverse-transforms and crops to the true output size.
//!
//! Transform matrices are fixed rational constants. Input is zero-padded up
//! to `tile * ceil(out/tile) + 2` per spatial dim before the transform, and
//! the output is computed in tile multiples and cropped. Channel counts are
//! unconstrained: the per-coefficient GEMM handles tails like any other
//! blocked matmul.
//!
//! All transform arithmetic is f32; f16 tensors are widened on entry and
//! narrowed on store.

use rayon::prelude::*;
use reikna_core::Element;

use crate::gemm::gemm_packed;
use crate::pack::{pack_a, pack_b, PackedA};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinogradVariant {
    /// F(4,3): 4x4 output tile, 6x6 input tile.
    B4F3,
    /// F(6,3): 6x6 output tile, 8x8 input tile.
    B6F3,
}

// F(4,3) kernel transform G (6x3)
const G_B4F3: [f32; 18] = [
    1.0 / 4.0, 0.0, 0.0,
    -1.0 / 6.0, -1.0 / 6.0, -1.0 / 6.0,
    -1.0 / 6.0, 1.0 / 6.0, -1.0 / 6.0,
    1.0 / 24.0, 1.0 / 12.0, 1.0 / 6.0,
    1.0 / 24.0, -1.0 / 12.0, 1.0 / 6.0,
    0.0, 0.0, 1.0,
];

// F(4,3) input transform BT (6x6)
const BT_B4F3: [f32; 36] = [
    4.0, 0.0, -5.0, 0.0, 1.0, 0.0,
    0.0, -4.0, -4.0, 1.0, 1.0, 0.0,
    0.0, 4.0, -4.0, -1.0, 1.0, 0.0,
    0.0, -2.0, -1.0, 2.0, 1.0, 0.0,
    0.0, 2.0, -1.0, -2.0, 1.0, 0.0,
    0.0, 4.0, 0.0, -5.0, 0.0, 1.0,
];

// F(4,3) output transform AT (4x6)
const AT_B4F3: [f32; 24] = [
    1.0, 1.0, 1.0, 1.0, 1.0, 0.0,
    0.0, 1.0, -1.0, 2.0, -2.0, 0.0,
    0.0, 1.0, 1.0, 4.0, 4.0, 0.0,
    0.0, 1.0, -1.0, 8.0, -8.0, 1.0,
];

// F(6,3) kernel transform G (8x3)
const G_B6F3: [f32; 24] = [
    1.0, 0.0, 0.0,
    -2.0 / 9.0, -2.0 / 9.0, -2.0 / 9.0,
    -2.0 / 9.0, 2.0 / 9.0, -2.0 / 9.0,
    1.0 / 90.0, 1.0 / 45.0, 2.0 / 45.0,
    1.0 / 90.0, -1.0 / 45.0, 2.0 / 45.0,
    1.0 / 45.0, 1.0 / 90.0, 1.0 / 180.0,
    1.0 / 45.0, -1.0 / 90.0, 1.0 / 180.0,
    0.0, 0.0, 1.0,
];

// F(6,3) input transform BT (8x8)
const BT_B6F3: [f32; 64] = [
    1.0, 0.0, -5.25, 0.0, 5.25, 0.0, -1.0, 0.0,
    0.0, 1.0, 1.0, -4.25, -4.25, 1.0, 1.0, 0.0,
    0.0, -1.0, 1.0, 4.25, -4.25, -1.0, 1.0, 0.0,
    0.0, 0.5, 0.25, -2.5, -1.25, 2.0, 1.0, 0.0,
    0.0, -0.5, 0.25, 2.5, -1.25, -2.0, 1.0, 0.0,
    0.0, 2.0, 4.0, -2.5, -5.0, 0.5, 1.0, 0.0,
    0.0, -2.0, 4.0, 2.5, -5.0, -0.5, 1.0, 0.0,
    0.0, -1.0, 0.0, 5.25, 0.0, -5.25, 0.0, 1.0,
];

// F(6,3) output transform AT (6x8), the scaled variant matching G above
const AT_B6F3: [f32; 48] = [
    1.0, 1.0, 1.0, 1.0, 1.0, 32.0, 32.0, 0.0,
    0.0, 1.0, -1.0, 2.0, -2.0, 16.0, -16.0, 0.0,
    0.0, 1.0, 1.0, 4.0, 4.0, 8.0, 8.0, 0.0,
    0.0, 1.0, -1.0, 8.0, -8.0, 4.0, -4.0, 0.0,
    0.0, 1.0, 1.0, 16.0, 16.0, 2.0, 2.0, 0.0,
    0.0, 1.0, -1.0, 32.0, -32.0, 1.0, -1.0, 1.0,
];

impl WinogradVariant {
    pub fn out_tile(&self) -> usize {
        match self {
            WinogradVariant::B4F3 => 4,
            WinogradVariant::B6F3 => 6,
        }
    }

    pub fn in_tile(&self) -> usize {
        match self {
            WinogradVariant::B4F3 => 6,
            WinogradVariant::B6F3 => 8,
        }
    }

    fn g(&self) -> &'static [f32] {
        match self {
            WinogradVariant::B4F3 => &G_B4F3,
            WinogradVariant::B6F3 => &G_B6F3,
        }
    }

    fn bt(&self) -> &'static [f32] {
        match self {
            WinogradVariant::B4F3 => &BT_B4F3,
            WinogradVariant::B6F3 => &BT_B6F3,
        }
    }

    fn at(&self) -> &'static [f32] {
        match self {
            WinogradVariant::B4F3 => &AT_B4F3,
            WinogradVariant::B6F3 => &AT_B6F3,
        }
    }
}

/// `out[m, n] = a[m, k] @ b[k, n]`, all row-major and small.
fn mat_mul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &mut [f32]) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for l in 0..k {
                sum += a[i * k + l] * b[l * n + j];
            }
            out[i * n + j] = sum;
        }
    }
}

/// `out[m, n] = a[m, k] @ b[n, k]^T` — used where the right factor is one of
/// the named transform matrices (B = BTᵀ, A = ATᵀ).
fn mat_mul_bt(a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &mut [f32]) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0;
            for l in 0..k {
                sum += a[i * k + l] * b[j * k + l];
            }
            out[i * n + j] = sum;
        }
    }
}

/// A 3x3 kernel transformed to basis space, packed per coefficient for the
/// batched channel GEMM. Built once at prepare time, immutable afterwards.
#[derive(Debug, Clone)]
pub struct WinogradKernel {
    pub variant: WinogradVariant,
    pub out_c: usize,
    pub in_c: usize,
    /// One packed `[out_c, in_c]` LHS per basis coefficient.
    coeffs: Vec<PackedA<f32>>,
}

/// Transforms a `[out_c, in_c, 3, 3]` kernel into basis space:
/// `U = G k Gᵀ` per channel pair.
pub fn transform_kernel(
    kernel: &[f32],
    out_c: usize,
    in_c: usize,
    variant: WinogradVariant,
) -> WinogradKernel {
    debug_assert_eq!(kernel.len(), out_c * in_c * 9);
    let t = variant.in_tile();
    let g = variant.g();
    let tt_total = t * t;

    // u_all[tt][oc][ic]
    let mut u_all = vec![0f32; tt_total * out_c * in_c];
    let mut tmp = vec![0f32; t * 3];
    let mut u = vec![0f32; t * t];

    for oc in 0..out_c {
        for ic in 0..in_c {
            let k9 = &kernel[(oc * in_c + ic) * 9..(oc * in_c + ic) * 9 + 9];
            mat_mul(g, k9, t, 3, 3, &mut tmp);
            mat_mul_bt(&tmp, g, t, 3, t, &mut u);
            for tt in 0..tt_total {
                u_all[tt * out_c * in_c + oc * in_c + ic] = u[tt];
            }
        }
    }

    let coeffs = (0..tt_total)
        .map(|tt| {
            let mat = &u_all[tt * out_c * in_c..(tt + 1) * out_c * in_c];
            pack_a(mat, out_c, in_c, 8)
        })
        .collect();

    WinogradKernel {
        variant,
        out_c,
        in_c,
        coeffs,
    }
}

/// Runs one image (`[in_c, in_h, in_w]`) through the Winograd pipeline into
/// `out` (`[out_c, out_h, out_w]`).
#[allow(clippy::too_many_arguments)]
pub fn conv_winograd<E: Element>(
    input: &[E],
    in_c: usize,
    in_h: usize,
    in_w: usize,
    kernel: &WinogradKernel,
    bias: Option<&[f32]>,
    pad_top: usize,
    pad_left: usize,
    out: &mut [E],
    out_h: usize,
    out_w: usize,
    gemm_width: usize,
) {
    let variant = kernel.variant;
    let t_out = variant.out_tile();
    let t_in = variant.in_tile();
    let tt_total = t_in * t_in;
    let out_c = kernel.out_c;
    debug_assert_eq!(kernel.in_c, in_c);

    let blk_h = out_h.div_ceil(t_out);
    let blk_w = out_w.div_ceil(t_out);
    let tiles = blk_h * blk_w;
    let padded_h = blk_h * t_out + 2;
    let padded_w = blk_w * t_out + 2;

    // Zero-pad and widen to f32, [in_c, padded_h, padded_w].
    let mut padded = vec![0f32; in_c * padded_h * padded_w];
    for c in 0..in_c {
        let src_plane = &input[c * in_h * in_w..(c + 1) * in_h * in_w];
        let dst_plane = &mut padded[c * padded_h * padded_w..(c + 1) * padded_h * padded_w];
        for h in 0..in_h {
            let dst_row = (h + pad_top) * padded_w + pad_left;
            for w in 0..in_w {
                dst_plane[dst_row + w] = src_plane[h * in_w + w].to_f32();
            }
        }
    }

    // Input transform: V[tt][ic][tile] = (BT d B) per tile.
    let bt = variant.bt();
    let mut v = vec![0f32; tt_total * in_c * tiles];
    let mut d = vec![0f32; tt_total];
    let mut t1 = vec![0f32; tt_total];
    let mut vt = vec![0f32; tt_total];
    for ic in 0..in_c {
        let plane = &padded[ic * padded_h * padded_w..(ic + 1) * padded_h * padded_w];
        for ti in 0..blk_h {
            for tj in 0..blk_w {
                for r in 0..t_in {
                    let row = (ti * t_out + r) * padded_w + tj * t_out;
                    d[r * t_in..(r + 1) * t_in].copy_from_slice(&plane[row..row + t_in]);
                }
                mat_mul(bt, &d, t_in, t_in, t_in, &mut t1);
                mat_mul_bt(&t1, bt, t_in, t_in, t_in, &mut vt);
                let tile_idx = ti * blk_w + tj;
                for tt in 0..tt_total {
                    v[(tt * in_c + ic) * tiles + tile_idx] = vt[tt];
                }
            }
        }
    }

    // Batched per-coefficient GEMM: M[tt] = U[tt] @ V[tt], [out_c, tiles].
    let m_all: Vec<Vec<f32>> = (0..tt_total)
        .into_par_iter()
        .map(|tt| {
            let v_tt = &v[tt * in_c * tiles..(tt + 1) * in_c * tiles];
            let pb = pack_b(v_tt, in_c, tiles, gemm_width);
            let mut m_tt = vec![0f32; out_c * tiles];
            gemm_packed(&mut m_tt, &kernel.coeffs[tt], &pb, None);
            m_tt
        })
        .collect();

    // Output transform with bias, cropped to the true extent.
    let at = variant.at();
    let mut m_tile = vec![0f32; tt_total];
    let mut t2 = vec![0f32; t_out * t_in];
    let mut o = vec![0f32; t_out * t_out];
    for oc in 0..out_c {
        let b = bias.map_or(0.0, |bv| bv[oc]);
        for ti in 0..blk_h {
            for tj in 0..blk_w {
                let tile_idx = ti * blk_w + tj;
                for tt in 0..tt_total {
                    m_tile[tt] = m_all[tt][oc * tiles + tile_idx];
                }
                mat_mul(at, &m_tile, t_out, t_in, t_in, &mut t2);
                mat_mul_bt(&t2, at, t_out, t_in, t_out, &mut o);
                for a in 0..t_out {
                    let oh = ti * t_out + a;
                    if oh >= out_h {
                        break;
                    }
                    for bcol in 0..t_out {
                        let ow = tj * t_out + bcol;
                        if ow >= out_w {
                            break;
                        }
                        out[(oc * out_h + oh) * out_w + ow] = E::from_f32(o[a * t_out + bcol] + b);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Winograd of a delta-function kernel must reproduce plain convolution:
    /// with k = center tap only, conv output equals the input (shifted).
    #[test]
    fn delta_kernel_is_identity_b4f3() {
        let (in_c, out_c) = (1, 1);
        let (in_h, in_w) = (6, 6);
        let mut k = vec![0f32; 9];
        k[4] = 1.0; // center tap
        let wk = transform_kernel(&k, out_c, in_c, WinogradVariant::B4F3);

        let input: Vec<f32> = (0..in_h * in_w).map(|i| (i % 13) as f32 - 6.0).collect();
        let (out_h, out_w) = (in_h, in_w); // pad 1 keeps the extent
        let mut out = vec![0f32; out_h * out_w];
        conv_winograd(
            &input, in_c, in_h, in_w, &wk, None, 1, 1, &mut out, out_h, out_w, 12,
        );
        for i in 0..out.len() {
            assert!(
                (out[i] - input[i]).abs() < 1e-4,
                "idx {}: {} vs {}",
                i,
                out[i],
                input[i]
            );
        }
    }

    #[test]
    fn delta_kernel_is_identity_b6f3() {
        let (in_c, out_c) = (1, 1);
        let (in_h, in_w) = (14, 14);
        let mut k = vec![0f32; 9];
        k[4] = 1.0;
        let wk = transform_kernel(&k, out_c, in_c, WinogradVariant::B6F3);

        let input: Vec<f32> = (0..in_h * in_w).map(|i| ((i * 7) % 11) as f32 * 0.25).collect();
        let (out_h, out_w) = (in_h, in_w);
        let mut out = vec![0f32; out_h * out_w];
        conv_winograd(
            &input, in_c, in_h, in_w, &wk, None, 1, 1, &mut out, out_h, out_w, 12,
        );
        for i in 0..out.len() {
            assert!(
                (out[i] - input[i]).abs() < 1e-3,
                "idx {}: {} vs {}",
                i,
                out[i],
                input[i]
            );
        }
    }

    #[test]
    fn kernel_transform_shapes() {
        let k = vec![0.5f32; 2 * 3 * 9];
        let wk = transform_kernel(&k, 2, 3, WinogradVariant::B4F3);
        assert_eq!(wk.coeffs.len(), 36);
        let wk = transform_kernel(&k, 2, 3, WinogradVariant::B6F3);
        assert_eq!(wk.coeffs.len(), 64);
    }
}
