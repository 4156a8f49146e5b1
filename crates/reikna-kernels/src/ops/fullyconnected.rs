//! Fully-connected layer (`y = x @ Wᵀ + b`).
//!
//! Weights are stored `[out_nodes, in_nodes]` and reordered once at prepare
//! time into the packed RHS the a0b1 GEMM flavor consumes; activations stay
//! row-major. The int8 path folds the input zero point into an owned bias
//! copy and requantizes per output node.

use anyhow::{anyhow, bail, Result};
use half::f16;
use log::debug;
use rayon::prelude::*;
use reikna_core::{DType, Layout, RequantParams, Tensor};

use crate::capability::gemm_tiles;
use crate::gemm::gemm_a0b1;
use crate::gemm::int8::gemm_a0b1_int8;
use crate::options::EngineOptions;
use crate::pack::{pack_b_int8_transposed, pack_b_transposed, PackedB, PackedBInt8};

/// Rows-per-chunk when fanning a large batch out over threads.
const PAR_BATCH_CHUNK: usize = 8;

enum FcWeights {
    F32(PackedB<f32>),
    F16(PackedB<f16>),
    I8(PackedBInt8),
}

/// A prepared fully-connected instance; read-only after `prepare`.
pub struct PreparedFullyConnected {
    dtype: DType,
    in_nodes: usize,
    out_nodes: usize,
    weights: FcWeights,
    bias_f32: Option<Vec<f32>>,
    bias_i32: Option<Vec<i32>>,
    requant: Option<RequantParams>,
}

/// Reorders the weight once and derives the int8 parameters.
///
/// `input` and `output` are shape/dtype/quantization descriptors
/// (`[batch, in_nodes]` / `[batch, out_nodes]`); their data is not read.
pub fn prepare(
    input: &Tensor,
    output: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    opts: &EngineOptions,
) -> Result<PreparedFullyConnected> {
    if weight.rank() != 2 {
        bail!("fully-connected weight must be [out_nodes, in_nodes]");
    }
    if input.rank() != 2 || output.rank() != 2 {
        bail!("fully-connected activations must be rank-2 [batch, nodes]");
    }
    let (out_nodes, in_nodes) = (weight.dim(0), weight.dim(1));
    if input.dim(1) != in_nodes {
        bail!(
            "input width {} does not match weight in_nodes {}",
            input.dim(1),
            in_nodes
        );
    }
    if output.dim(1) != out_nodes || output.dim(0) != input.dim(0) {
        bail!(
            "output dims {:?} do not match [{}, {}]",
            output.dims(),
            input.dim(0),
            out_nodes
        );
    }
    if input.dtype() != weight.dtype() {
        bail!(
            "input dtype {:?} and weight dtype {:?} differ",
            input.dtype(),
            weight.dtype()
        );
    }

    let dtype = weight.dtype();
    let tiles = gemm_tiles(opts.capability(), dtype);
    debug!(
        "fully-connected prepare: {}x{} {:?}, pack width {}",
        out_nodes, in_nodes, dtype, tiles.n
    );

    let mut prepared = PreparedFullyConnected {
        dtype,
        in_nodes,
        out_nodes,
        weights: FcWeights::F32(PackedB {
            data: Vec::new(),
            k: 0,
            n: 0,
            width: 1,
        }),
        bias_f32: None,
        bias_i32: None,
        requant: None,
    };

    match dtype {
        DType::F32 => {
            let w = weight.data().as_f32()?;
            prepared.weights = FcWeights::F32(pack_b_transposed(w, in_nodes, out_nodes, tiles.n));
            prepared.bias_f32 = bias.map(|b| b.data().as_f32().map(<[f32]>::to_vec)).transpose()?;
        }
        DType::F16 => {
            let w = weight.data().as_f16()?;
            prepared.weights = FcWeights::F16(pack_b_transposed(w, in_nodes, out_nodes, tiles.n));
            // f32 and f16 biases both accepted; widened once here
            prepared.bias_f32 = match bias {
                Some(b) if b.dtype() == DType::F16 => {
                    Some(b.data().as_f16()?.iter().map(|v| v.to_f32()).collect())
                }
                Some(b) => Some(b.data().as_f32()?.to_vec()),
                None => None,
            };
        }
        DType::I8 => {
            let in_q = input.quant_required("input")?;
            let out_q = output.quant_required("output")?;
            let w_q = weight.quant_required("weight")?;
            if w_q.is_per_channel() && w_q.channels() != out_nodes {
                bail!(
                    "weight per-channel quantization has {} channels, expected {}",
                    w_q.channels(),
                    out_nodes
                );
            }
            for c in 0..w_q.channels() {
                if w_q.param(c).zero_point != 0 {
                    bail!("int8 weights must be symmetrically quantized (zero_point == 0)");
                }
            }

            let w = weight.data().as_i8()?;
            let input_zp = in_q.param(0).zero_point;

            // Zero-point fusion, per output node.
            let mut fused: Vec<i32> = match bias {
                Some(b) => b.data().as_i32()?.to_vec(),
                None => vec![0; out_nodes],
            };
            if fused.len() != out_nodes {
                bail!("bias length {} does not match out_nodes {}", fused.len(), out_nodes);
            }
            for (o, f) in fused.iter_mut().enumerate() {
                let mut ksum = 0i32;
                for v in &w[o * in_nodes..(o + 1) * in_nodes] {
                    ksum += *v as i32;
                }
                *f -= ksum * input_zp;
            }

            let scales = if w_q.is_per_channel() {
                w_q.scales()
            } else {
                vec![w_q.param(0).scale]
            };
            prepared.requant = Some(RequantParams::from_scales(
                in_q.param(0).scale,
                &scales,
                out_q.param(0).scale,
                out_q.param(0).zero_point,
            ));
            prepared.bias_i32 = Some(fused);
            prepared.weights =
                FcWeights::I8(pack_b_int8_transposed(w, in_nodes, out_nodes, tiles.n));
        }
        DType::I32 => bail!("fully-connected does not support I32 activations"),
    }

    if let Some(b) = &prepared.bias_f32 {
        if b.len() != out_nodes {
            bail!("bias length {} does not match out_nodes {}", b.len(), out_nodes);
        }
    }

    Ok(prepared)
}

impl PreparedFullyConnected {
    /// Runs `[batch, in_nodes] -> [batch, out_nodes]`. Batches above
    /// [`PAR_BATCH_CHUNK`] rows are fanned out over threads (the prefill
    /// pattern); a single row runs inline (the decode pattern).
    pub fn execute(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        if input.rank() != 2 || output.rank() != 2 {
            bail!("fully-connected activations must be rank-2");
        }
        let batch = input.dim(0);
        if input.dim(1) != self.in_nodes
            || output.dim(0) != batch
            || output.dim(1) != self.out_nodes
        {
            bail!(
                "shapes [{}, {}] -> {:?} do not match prepared {}x{}",
                batch,
                input.dim(1),
                output.dims(),
                self.in_nodes,
                self.out_nodes
            );
        }
        if input.dtype() != self.dtype || output.dtype() != self.dtype {
            bail!(
                "dtype mismatch: prepared {:?}, input {:?}, output {:?}",
                self.dtype,
                input.dtype(),
                output.dtype()
            );
        }

        match &self.weights {
            FcWeights::F32(pb) => {
                let src = input.data().as_f32()?;
                let dst = output.data_mut().as_f32_mut()?;
                run_batched(src, dst, batch, self.in_nodes, self.out_nodes, |s, d, m| {
                    gemm_a0b1(d, s, m, pb, self.bias_f32.as_deref())
                });
            }
            FcWeights::F16(pb) => {
                let src = input.data().as_f16()?;
                let dst = output.data_mut().as_f16_mut()?;
                run_batched(src, dst, batch, self.in_nodes, self.out_nodes, |s, d, m| {
                    gemm_a0b1(d, s, m, pb, self.bias_f32.as_deref())
                });
            }
            FcWeights::I8(pb) => {
                let requant = self
                    .requant
                    .as_ref()
                    .ok_or_else(|| anyhow!("int8 fully-connected without requant parameters"))?;
                let bias = self.bias_i32.as_deref();
                let src = input.data().as_i8()?;
                let dst = output.data_mut().as_i8_mut()?;
                run_batched(src, dst, batch, self.in_nodes, self.out_nodes, |s, d, m| {
                    gemm_a0b1_int8(d, s, m, pb, bias, requant)
                });
            }
        }
        Ok(())
    }
}

/// Splits a batch into row chunks and runs `kernel` on each, in parallel
/// when the batch is large enough to pay for it.
fn run_batched<T: Send + Sync + Copy>(
    src: &[T],
    dst: &mut [T],
    batch: usize,
    in_nodes: usize,
    out_nodes: usize,
    kernel: impl Fn(&[T], &mut [T], usize) + Send + Sync,
) {
    if batch <= PAR_BATCH_CHUNK {
        kernel(src, dst, batch);
        return;
    }
    dst.par_chunks_mut(PAR_BATCH_CHUNK * out_nodes)
        .zip(src.par_chunks(PAR_BATCH_CHUNK * in_nodes))
        .for_each(|(d, s)| {
            let rows = s.len() / in_nodes;
            kernel(s, d, rows);
        });
}

/// One-tensor convenience used by tests and the layer above: allocates the
/// output and wires `prepare` + `execute` together.
pub fn fully_connected(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    opts: &EngineOptions,
) -> Result<Tensor> {
    let batch = input.dim(0);
    let out_nodes = weight.dim(0);
    let mut output = Tensor::zeros(vec![batch, out_nodes], Layout::RowMajor, input.dtype())?;
    let prepared = prepare(input, &output, weight, bias, opts)?;
    prepared.execute(input, &mut output)?;
    Ok(output)
}
