//! 2-D max pooling.
//!
//! The 2x2 stride-2 geometry gets a specialized kernel; everything else
//! takes the generic reference path with a logged warning. Both paths
//! share one semantic: a window only ever
//! maxes over real input elements. Padding — explicit or the column/row a
//! ceil-mode output synthesizes past the input edge — never participates,
//! so an all-negative input never leaks a zero.

use anyhow::{bail, Result};
use log::{debug, warn};
use reikna_core::{DType, Layout, Tensor};

use crate::options::EngineOptions;
use crate::reference::maxpool2d_ref;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPool2dParams {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_top: usize,
    pub pad_left: usize,
    pub pad_bottom: usize,
    pub pad_right: usize,
    /// Rounds output extents up instead of down, synthesizing a partial
    /// window at the far edge.
    pub ceil_mode: bool,
}

/// Output extent of one pooled dimension.
pub fn pool_out_dim(
    in_dim: usize,
    kernel: usize,
    stride: usize,
    pad_before: usize,
    pad_after: usize,
    ceil_mode: bool,
) -> usize {
    let span = in_dim + pad_before + pad_after - kernel;
    if ceil_mode {
        span.div_ceil(stride) + 1
    } else {
        span / stride + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolKind {
    K2x2S2,
    Generic,
}

/// A prepared max-pool instance.
pub struct PreparedMaxPool2d {
    params: MaxPool2dParams,
    kind: PoolKind,
    dtype: DType,
    batch: usize,
    channels: usize,
    in_h: usize,
    in_w: usize,
    out_h: usize,
    out_w: usize,
}

pub fn prepare(
    input: &Tensor,
    output: &Tensor,
    params: &MaxPool2dParams,
    opts: &EngineOptions,
) -> Result<PreparedMaxPool2d> {
    if input.rank() != 4 || output.rank() != 4 {
        bail!("maxpool2d wants rank-4 NCHW tensors");
    }
    if input.layout() != Layout::Nchw || output.layout() != Layout::Nchw {
        bail!("maxpool2d operates on NCHW tensors");
    }
    if params.kernel_h == 0 || params.kernel_w == 0 || params.stride_h == 0 || params.stride_w == 0
    {
        bail!("maxpool2d kernel and stride must be non-zero");
    }
    if input.dtype() != output.dtype() {
        bail!(
            "input dtype {:?} and output dtype {:?} differ",
            input.dtype(),
            output.dtype()
        );
    }
    if input.dtype() == DType::I32 {
        bail!("maxpool2d does not support I32 tensors");
    }

    let (batch, channels, in_h, in_w) = (input.dim(0), input.dim(1), input.dim(2), input.dim(3));
    let out_h = pool_out_dim(
        in_h,
        params.kernel_h,
        params.stride_h,
        params.pad_top,
        params.pad_bottom,
        params.ceil_mode,
    );
    let out_w = pool_out_dim(
        in_w,
        params.kernel_w,
        params.stride_w,
        params.pad_left,
        params.pad_right,
        params.ceil_mode,
    );
    if output.dims() != [batch, channels, out_h, out_w] {
        bail!(
            "output dims {:?} do not match computed [{}, {}, {}, {}]",
            output.dims(),
            batch,
            channels,
            out_h,
            out_w
        );
    }

    let specialized = params.kernel_h == 2
        && params.kernel_w == 2
        && params.stride_h == 2
        && params.stride_w == 2
        && params.pad_top == 0
        && params.pad_left == 0
        && opts.capability().has_vector();
    let kind = if specialized {
        PoolKind::K2x2S2
    } else {
        PoolKind::Generic
    };
    if kind == PoolKind::Generic {
        warn!(
            "maxpool2d: no specialized kernel for {}x{} s{}x{}, using the reference path",
            params.kernel_h, params.kernel_w, params.stride_h, params.stride_w
        );
    } else {
        debug!("maxpool2d prepare: 2x2s2 kernel, out {}x{}", out_h, out_w);
    }

    Ok(PreparedMaxPool2d {
        params: *params,
        kind,
        dtype: input.dtype(),
        batch,
        channels,
        in_h,
        in_w,
        out_h,
        out_w,
    })
}

/// Max over the real (in-bounds) elements of a 2x2 stride-2 window. The
/// trailing ceil-mode window may cover a single column or row.
fn maxpool2x2s2<T: Copy + PartialOrd>(
    input: &[T],
    channels: usize,
    in_h: usize,
    in_w: usize,
    out: &mut [T],
    out_h: usize,
    out_w: usize,
) {
    for c in 0..channels {
        let plane = &input[c * in_h * in_w..(c + 1) * in_h * in_w];
        for oh in 0..out_h {
            let ih = oh * 2;
            let h1 = (ih + 2).min(in_h);
            for ow in 0..out_w {
                let iw = ow * 2;
                let w1 = (iw + 2).min(in_w);
                let mut best = plane[ih * in_w + iw];
                for i in ih..h1 {
                    for j in iw..w1 {
                        let v = plane[i * in_w + j];
                        if v > best {
                            best = v;
                        }
                    }
                }
                out[(c * out_h + oh) * out_w + ow] = best;
            }
        }
    }
}

impl PreparedMaxPool2d {
    pub fn output_dims(&self) -> [usize; 4] {
        [self.batch, self.channels, self.out_h, self.out_w]
    }

    pub fn execute(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        if input.dims() != [self.batch, self.channels, self.in_h, self.in_w] {
            bail!(
                "input dims {:?} do not match prepared [{}, {}, {}, {}]",
                input.dims(),
                self.batch,
                self.channels,
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
            bail!("dtype mismatch against the prepared instance");
        }

        match self.dtype {
            DType::F32 => {
                let src = input.data().as_f32()?;
                let dst = output.data_mut().as_f32_mut()?;
                self.run(src, dst);
            }
            DType::F16 => {
                let src = input.data().as_f16()?;
                let dst = output.data_mut().as_f16_mut()?;
                self.run(src, dst);
            }
            DType::I8 => {
                let src = input.data().as_i8()?;
                let dst = output.data_mut().as_i8_mut()?;
                self.run(src, dst);
            }
            DType::I32 => bail!("maxpool2d does not support I32 tensors"),
        }
        Ok(())
    }

    fn run<T: Copy + PartialOrd>(&self, src: &[T], dst: &mut [T]) {
        let in_size = self.channels * self.in_h * self.in_w;
        let out_size = self.channels * self.out_h * self.out_w;
        let p = &self.params;

        for b in 0..self.batch {
            let image = &src[b * in_size..(b + 1) * in_size];
            let out = &mut dst[b * out_size..(b + 1) * out_size];
            match self.kind {
                PoolKind::K2x2S2 => maxpool2x2s2(
                    image,
                    self.channels,
                    self.in_h,
                    self.in_w,
                    out,
                    self.out_h,
                    self.out_w,
                ),
                PoolKind::Generic => maxpool2d_ref(
                    image,
                    self.channels,
                    self.in_h,
                    self.in_w,
                    p.kernel_h,
                    p.kernel_w,
                    p.stride_h,
                    p.stride_w,
                    p.pad_top,
                    p.pad_left,
                    out,
                    self.out_h,
                    self.out_w,
                ),
            }
        }
    }
}
