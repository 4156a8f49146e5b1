//! 2-D convolution: algorithm selection, weight preparation, execution.
//!
//! `prepare` runs once per operator instance. It picks the computation
//! strategy for the given shapes and dtype, transforms the kernel into the
//! layout that strategy wants (packed row blocks, or Winograd basis space),
//! derives the int8 requantization parameters, and folds the input zero
//! point into an owned bias copy. The caller's weight and bias tensors are
//! never mutated; everything derived lives in the returned
//! [`PreparedConv2d`], which is read-only during `execute`.
//!
//! `execute` may be called any number of times with new input data of the
//! same shapes.

use anyhow::{anyhow, bail, Result};
use half::f16;
use log::{debug, warn};
use rayon::prelude::*;
use reikna_core::{DType, Element, Layout, RequantParams, Tensor};

use crate::capability::{gemm_tiles, Capability, GemmTiles};
use crate::gemm::int8::gemm_packed_int8;
use crate::gemm::gemm_packed;
use crate::im2col::{conv_out_dim, im2col};
use crate::options::EngineOptions;
use crate::pack::{pack_a, pack_a_int8, pack_b, pack_b_int8, PackedA, PackedAInt8};
use crate::reference::{conv2d_ref, conv2d_ref_int8_i32};
use crate::winograd::{conv_winograd, transform_kernel, WinogradKernel, WinogradVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dParams {
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_top: usize,
    pub pad_left: usize,
    pub pad_bottom: usize,
    pub pad_right: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub group: usize,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Conv2dParams {
            stride_h: 1,
            stride_w: 1,
            pad_top: 0,
            pad_left: 0,
            pad_bottom: 0,
            pad_right: 0,
            dilation_h: 1,
            dilation_w: 1,
            group: 1,
        }
    }
}

/// The computation strategy chosen at prepare time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvAlgorithm {
    /// 1x1 stride-1 convolution treated as a plain matmul over positions.
    Gemm1x1,
    /// Winograd F(4,3), for small spatial extents.
    WinogradB4F3,
    /// Winograd F(6,3).
    WinogradB6F3,
    /// im2col followed by blocked GEMM (grouped variant included).
    Im2colGemm,
    /// Portable scalar reference; always correct, never fast.
    Reference,
}

/// Picks the strategy for one operator instance.
///
/// Pure and deterministic in its inputs, so selection is unit-testable with
/// a mocked capability. Inputs below 13 pixels per spatial dim take F(4,3);
/// larger ones amortize the bigger F(6,3) transform.
pub fn select_algorithm(
    params: &Conv2dParams,
    in_h: usize,
    in_w: usize,
    kh: usize,
    kw: usize,
    dtype: DType,
    cap: Capability,
    allow_winograd: bool,
) -> ConvAlgorithm {
    if !cap.has_vector() {
        return ConvAlgorithm::Reference;
    }
    let unit_stride = params.stride_h == 1 && params.stride_w == 1;
    let unit_dilation = params.dilation_h == 1 && params.dilation_w == 1;
    let no_pad = params.pad_top == 0
        && params.pad_left == 0
        && params.pad_bottom == 0
        && params.pad_right == 0;

    if kh == 1 && kw == 1 && unit_stride && unit_dilation && no_pad {
        return ConvAlgorithm::Gemm1x1;
    }
    if kh == 3
        && kw == 3
        && unit_stride
        && unit_dilation
        && params.group == 1
        && dtype.is_float()
        && allow_winograd
    {
        return if in_h < 13 && in_w < 13 {
            ConvAlgorithm::WinogradB4F3
        } else {
            ConvAlgorithm::WinogradB6F3
        };
    }
    ConvAlgorithm::Im2colGemm
}

/// Kernel data in the layout the chosen algorithm consumes.
enum PreparedWeights {
    PackedF32(Vec<PackedA<f32>>),
    PackedF16(Vec<PackedA<f16>>),
    PackedI8(Vec<PackedAInt8>),
    Winograd(WinogradKernel),
    RawF32(Vec<f32>),
    RawF16(Vec<f16>),
    RawI8(Vec<i8>),
}

/// An owned, immutable convolution instance: prepared weights, fused bias,
/// requantization parameters and the cached algorithm choice.
pub struct PreparedConv2d {
    algorithm: ConvAlgorithm,
    params: Conv2dParams,
    dtype: DType,
    batch: usize,
    in_c: usize,
    in_h: usize,
    in_w: usize,
    out_c: usize,
    out_h: usize,
    out_w: usize,
    kh: usize,
    kw: usize,
    tiles: GemmTiles,
    weights: PreparedWeights,
    bias_f32: Option<Vec<f32>>,
    bias_i32: Option<Vec<i32>>,
    requant: Option<RequantParams>,
    input_zp: i32,
}

fn bias_to_f32(bias: &Tensor) -> Result<Vec<f32>> {
    match bias.dtype() {
        DType::F32 => Ok(bias.data().as_f32()?.to_vec()),
        DType::F16 => Ok(bias.data().as_f16()?.iter().map(|v| v.to_f32()).collect()),
        other => Err(anyhow!("bias dtype {:?} not usable on a float path", other)),
    }
}

/// Selects and caches a kernel variant for the given shapes.
///
/// `input` and `output` act as shape/dtype descriptors; their data is not
/// read. Called once per operator instance, before any `execute`.
pub fn prepare(
    input: &Tensor,
    output: &Tensor,
    kernel: &Tensor,
    bias: Option<&Tensor>,
    params: &Conv2dParams,
    opts: &EngineOptions,
) -> Result<PreparedConv2d> {
    if input.rank() != 4 || output.rank() != 4 || kernel.rank() != 4 {
        bail!(
            "conv2d wants rank-4 tensors, got input {} / output {} / kernel {}",
            input.rank(),
            output.rank(),
            kernel.rank()
        );
    }
    if input.layout() != Layout::Nchw || output.layout() != Layout::Nchw {
        bail!("conv2d operates on NCHW tensors");
    }
    if params.stride_h == 0 || params.stride_w == 0 || params.dilation_h == 0
        || params.dilation_w == 0 || params.group == 0
    {
        bail!("conv2d strides, dilations and group must be non-zero");
    }

    let (batch, in_c, in_h, in_w) = (input.dim(0), input.dim(1), input.dim(2), input.dim(3));
    let (out_c, kh, kw) = (kernel.dim(0), kernel.dim(2), kernel.dim(3));
    let group = params.group;

    if in_c % group != 0 || out_c % group != 0 {
        bail!(
            "group {} must divide in_c {} and out_c {}",
            group,
            in_c,
            out_c
        );
    }
    if kernel.dim(1) != in_c / group {
        bail!(
            "kernel in-channel dim {} does not match in_c {} / group {}",
            kernel.dim(1),
            in_c,
            group
        );
    }
    if input.dtype() != kernel.dtype() {
        bail!(
            "input dtype {:?} and kernel dtype {:?} differ",
            input.dtype(),
            kernel.dtype()
        );
    }

    let out_h = conv_out_dim(in_h, kh, params.stride_h, params.pad_top, params.pad_bottom,
        params.dilation_h);
    let out_w = conv_out_dim(in_w, kw, params.stride_w, params.pad_left, params.pad_right,
        params.dilation_w);
    if output.dims() != [batch, out_c, out_h, out_w] {
        bail!(
            "output dims {:?} do not match computed [{}, {}, {}, {}]",
            output.dims(),
            batch,
            out_c,
            out_h,
            out_w
        );
    }

    let dtype = input.dtype();
    let cap = opts.capability();
    let algorithm = select_algorithm(params, in_h, in_w, kh, kw, dtype, cap, opts.allow_winograd);
    let tiles = gemm_tiles(cap, dtype);
    debug!(
        "conv2d prepare: {:?} for k={}x{} s={}x{} g={} {:?} in {}x{}",
        algorithm, kh, kw, params.stride_h, params.stride_w, group, dtype, in_h, in_w
    );
    if algorithm == ConvAlgorithm::Reference {
        warn!(
            "conv2d: no optimized path for k={}x{} {:?} on this capability, \
             falling back to the reference implementation",
            kh, kw, dtype
        );
    }

    let out_cg = out_c / group;
    let in_cg = in_c / group;
    let k_cols = in_cg * kh * kw;

    let mut prepared = PreparedConv2d {
        algorithm,
        params: *params,
        dtype,
        batch,
        in_c,
        in_h,
        in_w,
        out_c,
        out_h,
        out_w,
        kh,
        kw,
        tiles,
        weights: PreparedWeights::RawF32(Vec::new()),
        bias_f32: None,
        bias_i32: None,
        requant: None,
        input_zp: 0,
    };

    match dtype {
        DType::F32 | DType::F16 => {
            prepared.bias_f32 = bias.map(bias_to_f32).transpose()?;
            if let Some(b) = &prepared.bias_f32 {
                if b.len() != out_c {
                    bail!("bias length {} does not match out_c {}", b.len(), out_c);
                }
            }
            prepared.weights = match dtype {
                DType::F32 => prepare_float_weights::<f32>(
                    kernel.data().as_f32()?,
                    algorithm,
                    group,
                    out_cg,
                    in_cg,
                    k_cols,
                    tiles.m,
                )?,
                _ => prepare_float_weights::<f16>(
                    kernel.data().as_f16()?,
                    algorithm,
                    group,
                    out_cg,
                    in_cg,
                    k_cols,
                    tiles.m,
                )?,
            };
        }
        DType::I8 => {
            prepare_int8(&mut prepared, input, output, kernel, bias, group)?;
        }
        DType::I32 => bail!("conv2d does not support I32 activations"),
    }

    Ok(prepared)
}

/// Float element with typed storage in [`PreparedWeights`].
///
/// The enum stays dtype-tagged while the prepare/exec bodies are written
/// once, generically.
trait ConvElement: Element {
    fn wrap_packed(packed: Vec<PackedA<Self>>) -> PreparedWeights;
    fn wrap_raw(raw: Vec<Self>) -> PreparedWeights;
    fn packed(weights: &PreparedWeights, group: usize) -> Result<&PackedA<Self>>;
    fn raw(weights: &PreparedWeights) -> Result<&[Self]>;
}

impl ConvElement for f32 {
    fn wrap_packed(packed: Vec<PackedA<f32>>) -> PreparedWeights {
        PreparedWeights::PackedF32(packed)
    }
    fn wrap_raw(raw: Vec<f32>) -> PreparedWeights {
        PreparedWeights::RawF32(raw)
    }
    fn packed(weights: &PreparedWeights, group: usize) -> Result<&PackedA<f32>> {
        match weights {
            PreparedWeights::PackedF32(p) => Ok(&p[group]),
            _ => Err(anyhow!("prepared weights do not match the execution dtype")),
        }
    }
    fn raw(weights: &PreparedWeights) -> Result<&[f32]> {
        match weights {
            PreparedWeights::RawF32(v) => Ok(v),
            _ => Err(anyhow!("prepared weights do not match the execution dtype")),
        }
    }
}

impl ConvElement for f16 {
    fn wrap_packed(packed: Vec<PackedA<f16>>) -> PreparedWeights {
        PreparedWeights::PackedF16(packed)
    }
    fn wrap_raw(raw: Vec<f16>) -> PreparedWeights {
        PreparedWeights::RawF16(raw)
    }
    fn packed(weights: &PreparedWeights, group: usize) -> Result<&PackedA<f16>> {
        match weights {
            PreparedWeights::PackedF16(p) => Ok(&p[group]),
            _ => Err(anyhow!("prepared weights do not match the execution dtype")),
        }
    }
    fn raw(weights: &PreparedWeights) -> Result<&[f16]> {
        match weights {
            PreparedWeights::RawF16(v) => Ok(v),
            _ => Err(anyhow!("prepared weights do not match the execution dtype")),
        }
    }
}

fn prepare_float_weights<E: ConvElement>(
    kernel: &[E],
    algorithm: ConvAlgorithm,
    group: usize,
    out_cg: usize,
    in_cg: usize,
    k_cols: usize,
    m_block: usize,
) -> Result<PreparedWeights> {
    match algorithm {
        ConvAlgorithm::Gemm1x1 | ConvAlgorithm::Im2colGemm => {
            let packed: Vec<PackedA<E>> = (0..group)
                .map(|g| {
                    let mat = &kernel[g * out_cg * k_cols..(g + 1) * out_cg * k_cols];
                    pack_a(mat, out_cg, k_cols, m_block)
                })
                .collect();
            Ok(E::wrap_packed(packed))
        }
        ConvAlgorithm::WinogradB4F3 | ConvAlgorithm::WinogradB6F3 => {
            let variant = if algorithm == ConvAlgorithm::WinogradB4F3 {
                WinogradVariant::B4F3
            } else {
                WinogradVariant::B6F3
            };
            let k32: Vec<f32> = kernel.iter().map(|v| v.to_f32()).collect();
            Ok(PreparedWeights::Winograd(transform_kernel(
                &k32, out_cg, in_cg, variant,
            )))
        }
        ConvAlgorithm::Reference => Ok(E::wrap_raw(kernel.to_vec())),
    }
}

fn prepare_int8(
    prepared: &mut PreparedConv2d,
    input: &Tensor,
    output: &Tensor,
    kernel: &Tensor,
    bias: Option<&Tensor>,
    group: usize,
) -> Result<()> {
    let in_q = input.quant_required("input")?;
    let out_q = output.quant_required("output")?;
    let k_q = kernel.quant_required("kernel")?;

    let out_c = prepared.out_c;
    if k_q.is_per_channel() && k_q.channels() != out_c {
        bail!(
            "kernel per-channel quantization has {} channels, expected {}",
            k_q.channels(),
            out_c
        );
    }
    for c in 0..k_q.channels() {
        if k_q.param(c).zero_point != 0 {
            bail!("int8 kernels must be symmetrically quantized (zero_point == 0)");
        }
    }

    let input_zp = in_q.param(0).zero_point;
    let kernel_data = kernel.data().as_i8()?;
    let k_inner = (prepared.in_c / group) * prepared.kh * prepared.kw;

    // Zero-point fusion: bias[oc] -= sum(kernel[oc, ..]) * input_zp, so the
    // hot loop accumulates raw int8 products with no zp correction.
    let mut fused: Vec<i32> = match bias {
        Some(b) => {
            let bv = b.data().as_i32()?;
            if bv.len() != out_c {
                bail!("bias length {} does not match out_c {}", bv.len(), out_c);
            }
            bv.to_vec()
        }
        None => vec![0; out_c],
    };
    for oc in 0..out_c {
        let mut ksum = 0i32;
        for v in &kernel_data[oc * k_inner..(oc + 1) * k_inner] {
            ksum += *v as i32;
        }
        fused[oc] -= ksum * input_zp;
    }

    let kernel_scales = if k_q.is_per_channel() {
        k_q.scales()
    } else {
        vec![k_q.param(0).scale]
    };
    prepared.requant = Some(RequantParams::from_scales(
        in_q.param(0).scale,
        &kernel_scales,
        out_q.param(0).scale,
        out_q.param(0).zero_point,
    ));
    prepared.bias_i32 = Some(fused);
    prepared.input_zp = input_zp;

    let out_cg = out_c / group;
    prepared.weights = match prepared.algorithm {
        ConvAlgorithm::Reference => PreparedWeights::RawI8(kernel_data.to_vec()),
        _ => PreparedWeights::PackedI8(
            (0..group)
                .map(|g| {
                    let mat = &kernel_data[g * out_cg * k_inner..(g + 1) * out_cg * k_inner];
                    pack_a_int8(mat, out_cg, k_inner, prepared.tiles.m)
                })
                .collect(),
        ),
    };
    Ok(())
}

impl PreparedConv2d {
    pub fn algorithm(&self) -> ConvAlgorithm {
        self.algorithm
    }

    pub fn output_dims(&self) -> [usize; 4] {
        [self.batch, self.out_c, self.out_h, self.out_w]
    }

    /// Runs the convolution. Input and output must have the shapes this
    /// instance was prepared with.
    pub fn execute(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        if input.dims() != [self.batch, self.in_c, self.in_h, self.in_w] {
            bail!(
                "input dims {:?} do not match prepared [{}, {}, {}, {}]",
                input.dims(),
                self.batch,
                self.in_c,
                self.in_h,
                self.in_w
            );
        }
        if output.dims() != self.output_dims() {
            bail!(
                "output dims {:?} do not match prepared {:?}",
                output.dims(),
                self.output_dims()
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

        match self.dtype {
            DType::F32 => {
                let src = input.data().as_f32()?;
                // Split the borrow before the mutable one.
                let dst = output.data_mut().as_f32_mut()?;
                self.execute_float::<f32>(src, dst)
            }
            DType::F16 => {
                let src = input.data().as_f16()?;
                let dst = output.data_mut().as_f16_mut()?;
                self.execute_float::<f16>(src, dst)
            }
            DType::I8 => {
                let src = input.data().as_i8()?;
                let dst = output.data_mut().as_i8_mut()?;
                self.execute_int8(src, dst)
            }
            DType::I32 => bail!("conv2d does not support I32 activations"),
        }
    }

    fn execute_float<E: ConvElement>(&self, input: &[E], output: &mut [E]) -> Result<()> {
        let in_size = self.in_c * self.in_h * self.in_w;
        let out_size = self.out_c * self.out_h * self.out_w;

        let run_image = |src: &[E], dst: &mut [E]| self.conv_image_float(src, dst);

        if self.batch > 1 {
            output
                .par_chunks_mut(out_size)
                .zip(input.par_chunks(in_size))
                .try_for_each(|(dst, src)| run_image(src, dst))
        } else {
            run_image(input, output)
        }
    }

    fn conv_image_float<E: ConvElement>(&self, src: &[E], dst: &mut [E]) -> Result<()> {
        let group = self.params.group;
        let in_cg = self.in_c / group;
        let out_cg = self.out_c / group;
        let hw_out = self.out_h * self.out_w;
        let bias = self.bias_f32.as_deref();

        match (&self.weights, self.algorithm) {
            (_, ConvAlgorithm::Gemm1x1) => {
                for g in 0..group {
                    let b_mat = &src[g * in_cg * hw_out..(g + 1) * in_cg * hw_out];
                    let pb = pack_b(b_mat, in_cg, hw_out, self.tiles.n);
                    let pa = E::packed(&self.weights, g)?;
                    let out_g = &mut dst[g * out_cg * hw_out..(g + 1) * out_cg * hw_out];
                    gemm_packed(out_g, pa, &pb, bias.map(|b| &b[g * out_cg..(g + 1) * out_cg]));
                }
                Ok(())
            }
            (PreparedWeights::Winograd(wk), _) => {
                conv_winograd(
                    src,
                    self.in_c,
                    self.in_h,
                    self.in_w,
                    wk,
                    bias,
                    self.params.pad_top,
                    self.params.pad_left,
                    dst,
                    self.out_h,
                    self.out_w,
                    self.tiles.n,
                );
                Ok(())
            }
            (_, ConvAlgorithm::Im2colGemm) => {
                let p = &self.params;
                for g in 0..group {
                    let ch = &src[g * in_cg * self.in_h * self.in_w
                        ..(g + 1) * in_cg * self.in_h * self.in_w];
                    let cols = im2col(
                        ch, in_cg, self.in_h, self.in_w, self.out_h, self.out_w, self.kh,
                        self.kw, p.stride_h, p.stride_w, p.pad_top, p.pad_left, p.dilation_h,
                        p.dilation_w, E::from_f32(0.0),
                    );
                    let pb = pack_b(&cols, in_cg * self.kh * self.kw, hw_out, self.tiles.n);
                    let pa = E::packed(&self.weights, g)?;
                    let out_g = &mut dst[g * out_cg * hw_out..(g + 1) * out_cg * hw_out];
                    gemm_packed(out_g, pa, &pb, bias.map(|b| &b[g * out_cg..(g + 1) * out_cg]));
                }
                Ok(())
            }
            (weights, ConvAlgorithm::Reference) => {
                let p = &self.params;
                let kernel = E::raw(weights)?;
                conv2d_ref(
                    src, self.in_c, self.in_h, self.in_w, kernel, self.out_c, self.kh, self.kw,
                    bias, p.stride_h, p.stride_w, p.pad_top, p.pad_left, p.dilation_h,
                    p.dilation_w, group, dst, self.out_h, self.out_w,
                );
                Ok(())
            }
            _ => Err(anyhow!("prepared weights do not match the algorithm")),
        }
    }

    fn execute_int8(&self, input: &[i8], output: &mut [i8]) -> Result<()> {
        let in_size = self.in_c * self.in_h * self.in_w;
        let out_size = self.out_c * self.out_h * self.out_w;

        if self.batch > 1 {
            output
                .par_chunks_mut(out_size)
                .zip(input.par_chunks(in_size))
                .try_for_each(|(dst, src)| self.conv_image_int8(src, dst))
        } else {
            self.conv_image_int8(input, output)
        }
    }

    fn conv_image_int8(&self, src: &[i8], dst: &mut [i8]) -> Result<()> {
        let group = self.params.group;
        let in_cg = self.in_c / group;
        let out_cg = self.out_c / group;
        let hw_out = self.out_h * self.out_w;
        let bias = self
            .bias_i32
            .as_deref()
            .ok_or_else(|| anyhow!("int8 conv executed without a fused bias"))?;
        let requant = self
            .requant
            .as_ref()
            .ok_or_else(|| anyhow!("int8 conv executed without requant parameters"))?;
        let zp = self.input_zp.clamp(-128, 127) as i8;

        match (&self.weights, self.algorithm) {
            (PreparedWeights::PackedI8(pa), ConvAlgorithm::Gemm1x1) => {
                for g in 0..group {
                    let b_mat = &src[g * in_cg * hw_out..(g + 1) * in_cg * hw_out];
                    let pb = pack_b_int8(b_mat, in_cg, hw_out, self.tiles.n);
                    let out_g = &mut dst[g * out_cg * hw_out..(g + 1) * out_cg * hw_out];
                    gemm_packed_int8(
                        out_g,
                        &pa[g],
                        &pb,
                        Some(&bias[g * out_cg..(g + 1) * out_cg]),
                        requant,
                        g * out_cg,
                    );
                }
                Ok(())
            }
            (PreparedWeights::PackedI8(pa), _) => {
                let p = &self.params;
                for g in 0..group {
                    let ch = &src[g * in_cg * self.in_h * self.in_w
                        ..(g + 1) * in_cg * self.in_h * self.in_w];
                    let cols = im2col(
                        ch, in_cg, self.in_h, self.in_w, self.out_h, self.out_w, self.kh,
                        self.kw, p.stride_h, p.stride_w, p.pad_top, p.pad_left, p.dilation_h,
                        p.dilation_w, zp,
                    );
                    let pb =
                        pack_b_int8(&cols, in_cg * self.kh * self.kw, hw_out, self.tiles.n);
                    let out_g = &mut dst[g * out_cg * hw_out..(g + 1) * out_cg * hw_out];
                    gemm_packed_int8(
                        out_g,
                        &pa[g],
                        &pb,
                        Some(&bias[g * out_cg..(g + 1) * out_cg]),
                        requant,
                        g * out_cg,
                    );
                }
                Ok(())
            }
            (PreparedWeights::RawI8(kernel), ConvAlgorithm::Reference) => {
                let p = &self.params;
                let mut acc = vec![0i32; self.out_c * hw_out];
                conv2d_ref_int8_i32(
                    src, self.in_c, self.in_h, self.in_w, kernel, self.out_c, self.kh, self.kw,
                    Some(bias), p.stride_h, p.stride_w, p.pad_top, p.pad_left, p.dilation_h,
                    p.dilation_w, group, zp, &mut acc, self.out_h, self.out_w,
                );
                for oc in 0..self.out_c {
                    for s in 0..hw_out {
                        dst[oc * hw_out + s] = requant.apply(acc[oc * hw_out + s], oc);
                    }
                }
                Ok(())
            }
            _ => Err(anyhow!("prepared weights do not match the algorithm")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_3x3() -> Conv2dParams {
        Conv2dParams {
            pad_top: 1,
            pad_left: 1,
            pad_bottom: 1,
            pad_right: 1,
            ..Default::default()
        }
    }

    #[test]
    fn selection_is_pure_and_deterministic() {
        let cap = Capability::with_vector_bytes(16);
        let p = params_3x3();
        let a = select_algorithm(&p, 14, 14, 3, 3, DType::F32, cap, true);
        let b = select_algorithm(&p, 14, 14, 3, 3, DType::F32, cap, true);
        assert_eq!(a, b);
    }

    #[test]
    fn spatial_threshold_splits_winograd_variants() {
        let cap = Capability::with_vector_bytes(16);
        let p = params_3x3();
        assert_eq!(
            select_algorithm(&p, 12, 12, 3, 3, DType::F32, cap, true),
            ConvAlgorithm::WinogradB4F3
        );
        // 14x14 sits past the < 13 boundary
        assert_eq!(
            select_algorithm(&p, 14, 14, 3, 3, DType::F32, cap, true),
            ConvAlgorithm::WinogradB6F3
        );
        assert_eq!(
            select_algorithm(&p, 12, 14, 3, 3, DType::F32, cap, true),
            ConvAlgorithm::WinogradB6F3
        );
    }

    #[test]
    fn one_by_one_goes_to_gemm() {
        let cap = Capability::with_vector_bytes(16);
        let p = Conv2dParams::default();
        assert_eq!(
            select_algorithm(&p, 7, 7, 1, 1, DType::I8, cap, true),
            ConvAlgorithm::Gemm1x1
        );
        let strided = Conv2dParams {
            stride_h: 2,
            stride_w: 2,
            ..Default::default()
        };
        assert_eq!(
            select_algorithm(&strided, 7, 7, 1, 1, DType::F32, cap, true),
            ConvAlgorithm::Im2colGemm
        );
    }

    #[test]
    fn int8_never_selects_winograd() {
        let cap = Capability::with_vector_bytes(16);
        let p = params_3x3();
        assert_eq!(
            select_algorithm(&p, 8, 8, 3, 3, DType::I8, cap, true),
            ConvAlgorithm::Im2colGemm
        );
    }

    #[test]
    fn absent_capability_forces_reference() {
        let p = params_3x3();
        assert_eq!(
            select_algorithm(&p, 14, 14, 3, 3, DType::F32, Capability::scalar(), true),
            ConvAlgorithm::Reference
        );
    }

    #[test]
    fn winograd_can_be_disabled() {
        let cap = Capability::with_vector_bytes(16);
        let p = params_3x3();
        assert_eq!(
            select_algorithm(&p, 14, 14, 3, 3, DType::F32, cap, false),
            ConvAlgorithm::Im2colGemm
        );
    }
}
