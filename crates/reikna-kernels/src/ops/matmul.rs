//! Batched matrix multiply (`C = A @ B`).
//!
//! `prepare` packs the RHS once, for the common case where B is a constant
//! weight reused across calls; the batch dimension of B may be 1 and is
//! then broadcast over A's batch. The int8 path subtracts both operands'
//! zero points exactly via row/column-sum corrections on the int32
//! accumulator before requantizing per tensor:
//!
//! `Σ (a-za)(b-zb) = Σ ab - zb·Σa_row - za·Σb_col + k·za·zb`
//!
//! The column sums of B are precomputed at prepare time.

use anyhow::{anyhow, bail, Result};
use half::f16;
use log::debug;
use rayon::prelude::*;
use reikna_core::{DType, Element, RequantParams, Tensor};

use crate::capability::gemm_tiles;
use crate::gemm::gemm_a0b1;
use crate::gemm::int8::gemm_a0b1_int8_i32;
use crate::options::EngineOptions;
use crate::pack::{pack_b, pack_b_int8, PackedB, PackedBInt8};

enum MatB {
    F32(Vec<PackedB<f32>>),
    F16(Vec<PackedB<f16>>),
    I8 {
        packed: Vec<PackedBInt8>,
        col_sums: Vec<Vec<i32>>,
        zero_point: i32,
        scale: f32,
    },
}

/// A packed RHS ready for repeated `execute` calls.
pub struct PreparedMatmul {
    dtype: DType,
    batch_b: usize,
    k: usize,
    n: usize,
    b: MatB,
}

fn batch_dims(t: &Tensor) -> Result<(usize, usize, usize)> {
    match t.rank() {
        2 => Ok((1, t.dim(0), t.dim(1))),
        3 => Ok((t.dim(0), t.dim(1), t.dim(2))),
        r => Err(anyhow!("matmul operands must be rank 2 or 3, got rank {}", r)),
    }
}

/// Packs the RHS (`[k, n]` or `[batch, k, n]`).
pub fn prepare(b: &Tensor, opts: &EngineOptions) -> Result<PreparedMatmul> {
    let (batch_b, k, n) = batch_dims(b)?;
    let dtype = b.dtype();
    let tiles = gemm_tiles(opts.capability(), dtype);
    debug!("matmul prepare: B [{}x{}x{}] {:?}", batch_b, k, n, dtype);

    let mat = match dtype {
        DType::F32 => {
            let data = b.data().as_f32()?;
            MatB::F32(
                (0..batch_b)
                    .map(|i| pack_b(&data[i * k * n..(i + 1) * k * n], k, n, tiles.n))
                    .collect(),
            )
        }
        DType::F16 => {
            let data = b.data().as_f16()?;
            MatB::F16(
                (0..batch_b)
                    .map(|i| pack_b(&data[i * k * n..(i + 1) * k * n], k, n, tiles.n))
                    .collect(),
            )
        }
        DType::I8 => {
            let q = b.quant_required("matmul RHS")?;
            if q.is_per_channel() {
                bail!("matmul int8 supports per-tensor quantization only");
            }
            let data = b.data().as_i8()?;
            let packed = (0..batch_b)
                .map(|i| pack_b_int8(&data[i * k * n..(i + 1) * k * n], k, n, tiles.n))
                .collect();
            let col_sums = (0..batch_b)
                .map(|i| {
                    let m = &data[i * k * n..(i + 1) * k * n];
                    let mut sums = vec![0i32; n];
                    for r in 0..k {
                        for (c, s) in sums.iter_mut().enumerate() {
                            *s += m[r * n + c] as i32;
                        }
                    }
                    sums
                })
                .collect();
            MatB::I8 {
                packed,
                col_sums,
                zero_point: q.param(0).zero_point,
                scale: q.param(0).scale,
            }
        }
        DType::I32 => bail!("matmul does not support I32 operands"),
    };

    Ok(PreparedMatmul {
        dtype,
        batch_b,
        k,
        n,
        b: mat,
    })
}

impl PreparedMatmul {
    /// `output = a @ B`. A batch of `B == 1` broadcasts over A's batch.
    pub fn execute(&self, a: &Tensor, output: &mut Tensor) -> Result<()> {
        let (batch_a, m, k) = batch_dims(a)?;
        if k != self.k {
            bail!("A inner dim {} does not match prepared K {}", k, self.k);
        }
        if self.batch_b != 1 && self.batch_b != batch_a {
            bail!(
                "B batch {} neither 1 nor equal to A batch {}",
                self.batch_b,
                batch_a
            );
        }
        let (batch_o, mo, no) = batch_dims(output)?;
        if batch_o != batch_a || mo != m || no != self.n {
            bail!(
                "output dims {:?} do not match [{}, {}, {}]",
                output.dims(),
                batch_a,
                m,
                self.n
            );
        }
        if a.dtype() != self.dtype || output.dtype() != self.dtype {
            bail!(
                "dtype mismatch: prepared {:?}, A {:?}, output {:?}",
                self.dtype,
                a.dtype(),
                output.dtype()
            );
        }

        let n = self.n;
        match &self.b {
            MatB::F32(packed) => {
                let src = a.data().as_f32()?;
                let dst = output.data_mut().as_f32_mut()?;
                batched_float(src, dst, batch_a, m, k, n, packed, self.batch_b);
            }
            MatB::F16(packed) => {
                let src = a.data().as_f16()?;
                let dst = output.data_mut().as_f16_mut()?;
                batched_float(src, dst, batch_a, m, k, n, packed, self.batch_b);
            }
            MatB::I8 {
                packed,
                col_sums,
                zero_point: b_zp,
                scale: b_scale,
            } => {
                let a_q = a.quant_required("matmul LHS")?;
                let out_q = output.quant_required("matmul output")?;
                if a_q.is_per_channel() || out_q.is_per_channel() {
                    bail!("matmul int8 supports per-tensor quantization only");
                }
                let a_zp = a_q.param(0).zero_point;
                let real = a_q.param(0).scale as f64 * *b_scale as f64
                    / out_q.param(0).scale as f64;
                let (mult, shift) = reikna_core::quantize_multiplier(real);
                let requant = RequantParams {
                    multiplier: vec![mult],
                    shift: vec![shift],
                    out_zp: out_q.param(0).zero_point,
                };

                let src = a.data().as_i8()?;
                let dst = output.data_mut().as_i8_mut()?;
                for img in 0..batch_a {
                    let bi = if self.batch_b == 1 { 0 } else { img };
                    let a_mat = &src[img * m * k..(img + 1) * m * k];
                    let o_mat = &mut dst[img * m * n..(img + 1) * m * n];
                    matmul_int8_image(
                        a_mat, o_mat, m, k, n, &packed[bi], &col_sums[bi], a_zp, *b_zp, &requant,
                    );
                }
            }
        }
        Ok(())
    }
}

fn batched_float<E: Element>(
    src: &[E],
    dst: &mut [E],
    batch_a: usize,
    m: usize,
    k: usize,
    n: usize,
    packed: &[PackedB<E>],
    batch_b: usize,
) {
    if batch_a > 1 {
        dst.par_chunks_mut(m * n)
            .enumerate()
            .for_each(|(img, o_mat)| {
                let bi = if batch_b == 1 { 0 } else { img };
                let a_mat = &src[img * m * k..(img + 1) * m * k];
                gemm_a0b1(o_mat, a_mat, m, &packed[bi], None);
            });
    } else {
        gemm_a0b1(dst, src, m, &packed[0], None);
    }
}

#[allow(clippy::too_many_arguments)]
fn matmul_int8_image(
    a: &[i8],
    out: &mut [i8],
    m: usize,
    k: usize,
    n: usize,
    packed: &PackedBInt8,
    col_sums: &[i32],
    a_zp: i32,
    b_zp: i32,
    requant: &RequantParams,
) {
    let mut acc = vec![0i32; m * n];
    gemm_a0b1_int8_i32(&mut acc, a, m, packed, None);

    let kzz = k as i32 * a_zp * b_zp;
    for r in 0..m {
        let mut row_sum = 0i32;
        for v in &a[r * k..(r + 1) * k] {
            row_sum += *v as i32;
        }
        let row = &mut acc[r * n..(r + 1) * n];
        for c in 0..n {
            let corrected = row[c] - b_zp * row_sum - a_zp * col_sums[c] + kzz;
            out[r * n + c] = requant.apply(corrected, 0);
        }
    }
}
