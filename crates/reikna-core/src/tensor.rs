//! Tensor descriptors and typed buffers.
//!
//! A [`Tensor`] couples a shape (rank ≤ 6), a memory-layout tag, an owned
//! typed buffer and optional quantization info. Constructors validate that
//! the buffer length matches the shape; the compute crates can therefore
//! index without re-checking.
//!
//! Quantization info stores only `{scale, zero_point}`. The fixed-point
//! `{multiplier, shift}` pairs used by int8 kernels are derived at
//! operator-prepare time into the prepared-weight value, so a tensor shared
//! between operators is never mutated by preparing one of them.

use anyhow::{anyhow, bail, Result};
use half::f16;
use ndarray::{Array2, Array4, ArrayView2, ArrayView4};

use crate::dtype::DType;
use crate::layout::Layout;

pub const MAX_RANK: usize = 6;

/// Owned, typed element storage.
#[derive(Debug, Clone)]
pub enum TensorData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    I8(Vec<i8>),
    I32(Vec<i32>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::F16(_) => DType::F16,
            TensorData::I8(_) => DType::I8,
            TensorData::I32(_) => DType::I32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F16(v) => v.len(),
            TensorData::I8(v) => v.len(),
            TensorData::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Result<&[f32]> {
        match self {
            TensorData::F32(v) => Ok(v),
            other => Err(anyhow!("expected F32 data, found {:?}", other.dtype())),
        }
    }

    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        match self {
            TensorData::F32(v) => Ok(v),
            other => Err(anyhow!("expected F32 data, found {:?}", other.dtype())),
        }
    }

    pub fn as_f16(&self) -> Result<&[f16]> {
        match self {
            TensorData::F16(v) => Ok(v),
            other => Err(anyhow!("expected F16 data, found {:?}", other.dtype())),
        }
    }

    pub fn as_f16_mut(&mut self) -> Result<&mut [f16]> {
        match self {
            TensorData::F16(v) => Ok(v),
            other => Err(anyhow!("expected F16 data, found {:?}", other.dtype())),
        }
    }

    pub fn as_i8(&self) -> Result<&[i8]> {
        match self {
            TensorData::I8(v) => Ok(v),
            other => Err(anyhow!("expected I8 data, found {:?}", other.dtype())),
        }
    }

    pub fn as_i8_mut(&mut self) -> Result<&mut [i8]> {
        match self {
            TensorData::I8(v) => Ok(v),
            other => Err(anyhow!("expected I8 data, found {:?}", other.dtype())),
        }
    }

    pub fn as_i32(&self) -> Result<&[i32]> {
        match self {
            TensorData::I32(v) => Ok(v),
            other => Err(anyhow!("expected I32 data, found {:?}", other.dtype())),
        }
    }
}

/// Quantization of one tensor (or one channel of it).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParam {
    pub scale: f32,
    pub zero_point: i32,
}

/// Per-tensor or per-channel quantization info.
#[derive(Debug, Clone)]
pub struct QuantInfo {
    params: Vec<QuantParam>,
}

impl QuantInfo {
    pub fn per_tensor(scale: f32, zero_point: i32) -> Self {
        QuantInfo {
            params: vec![QuantParam { scale, zero_point }],
        }
    }

    pub fn per_channel(params: Vec<QuantParam>) -> Result<Self> {
        if params.is_empty() {
            bail!("per-channel quantization needs at least one channel");
        }
        Ok(QuantInfo { params })
    }

    pub fn is_per_channel(&self) -> bool {
        self.params.len() > 1
    }

    pub fn channels(&self) -> usize {
        self.params.len()
    }

    /// Parameters for `channel`; a per-tensor info answers every channel.
    pub fn param(&self, channel: usize) -> QuantParam {
        if self.params.len() == 1 {
            self.params[0]
        } else {
            self.params[channel]
        }
    }

    pub fn scales(&self) -> Vec<f32> {
        self.params.iter().map(|p| p.scale).collect()
    }
}

/// A shaped, typed, optionally quantized tensor.
#[derive(Debug, Clone)]
pub struct Tensor {
    dims: Vec<usize>,
    layout: Layout,
    data: TensorData,
    quant: Option<QuantInfo>,
}

impl Tensor {
    /// Builds a tensor, validating rank, non-empty dims and buffer length.
    pub fn new(dims: Vec<usize>, layout: Layout, data: TensorData) -> Result<Self> {
        if dims.is_empty() || dims.len() > MAX_RANK {
            bail!("tensor rank must be 1..={}, got {}", MAX_RANK, dims.len());
        }
        if dims.iter().any(|&d| d == 0) {
            bail!("tensor dims must be non-zero, got {:?}", dims);
        }
        let expect: usize = dims.iter().product();
        if data.len() != expect {
            bail!(
                "buffer length {} does not match dims {:?} (expected {})",
                data.len(),
                dims,
                expect
            );
        }
        Ok(Tensor {
            dims,
            layout,
            data,
            quant: None,
        })
    }

    /// Allocates a zero-filled tensor of the given shape and dtype.
    pub fn zeros(dims: Vec<usize>, layout: Layout, dtype: DType) -> Result<Self> {
        let n: usize = dims.iter().product();
        let data = match dtype {
            DType::F32 => TensorData::F32(vec![0.0; n]),
            DType::F16 => TensorData::F16(vec![f16::ZERO; n]),
            DType::I8 => TensorData::I8(vec![0; n]),
            DType::I32 => TensorData::I32(vec![0; n]),
        };
        Tensor::new(dims, layout, data)
    }

    pub fn with_quant(mut self, quant: QuantInfo) -> Self {
        self.quant = Some(quant);
        self
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut TensorData {
        &mut self.data
    }

    pub fn quant(&self) -> Option<&QuantInfo> {
        self.quant.as_ref()
    }

    /// Quant info or an error naming the tensor's role, for int8 paths
    /// where missing quantization is an invalid-tensor-state error.
    pub fn quant_required(&self, role: &str) -> Result<&QuantInfo> {
        self.quant
            .as_ref()
            .ok_or_else(|| anyhow!("{} tensor is I8 but carries no quantization info", role))
    }

    // ===== ndarray interop (API-surface convenience) =====

    pub fn from_array4_f32(arr: Array4<f32>, layout: Layout) -> Result<Self> {
        let dims = arr.shape().to_vec();
        let (data, _) = arr.into_raw_vec_and_offset();
        Tensor::new(dims, layout, TensorData::F32(data))
    }

    pub fn from_array2_f32(arr: Array2<f32>) -> Result<Self> {
        let dims = arr.shape().to_vec();
        let (data, _) = arr.into_raw_vec_and_offset();
        Tensor::new(dims, Layout::RowMajor, TensorData::F32(data))
    }

    pub fn view_array4_f32(&self) -> Result<ArrayView4<'_, f32>> {
        if self.rank() != 4 {
            bail!("expected rank-4 tensor, got rank {}", self.rank());
        }
        let d = &self.dims;
        ArrayView4::from_shape((d[0], d[1], d[2], d[3]), self.data.as_f32()?)
            .map_err(|e| anyhow!("shape error: {}", e))
    }

    pub fn view_array2_f32(&self) -> Result<ArrayView2<'_, f32>> {
        if self.rank() != 2 {
            bail!("expected rank-2 tensor, got rank {}", self.rank());
        }
        ArrayView2::from_shape((self.dims[0], self.dims[1]), self.data.as_f32()?)
            .map_err(|e| anyhow!("shape error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_mismatched_buffer() {
        let r = Tensor::new(
            vec![2, 3],
            Layout::RowMajor,
            TensorData::F32(vec![0.0; 5]),
        );
        assert!(r.is_err());
    }

    #[test]
    fn new_rejects_zero_dim_and_excess_rank() {
        assert!(Tensor::new(vec![2, 0], Layout::RowMajor, TensorData::F32(vec![])).is_err());
        assert!(Tensor::new(
            vec![1, 1, 1, 1, 1, 1, 1],
            Layout::RowMajor,
            TensorData::F32(vec![0.0])
        )
        .is_err());
    }

    #[test]
    fn per_tensor_quant_answers_every_channel() {
        let q = QuantInfo::per_tensor(0.5, 3);
        assert!(!q.is_per_channel());
        assert_eq!(q.param(0).zero_point, 3);
        assert_eq!(q.param(17).zero_point, 3);
    }

    #[test]
    fn zeros_matches_dtype_and_shape() {
        let t = Tensor::zeros(vec![1, 2, 3, 4], Layout::Nchw, DType::I8).unwrap();
        assert_eq!(t.element_count(), 24);
        assert_eq!(t.dtype(), DType::I8);
        assert_eq!(t.data().as_i8().unwrap().len(), 24);
    }
}
