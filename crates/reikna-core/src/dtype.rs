//! Element data types supported by the kernel engine.

use half::f16;

/// Data type of a tensor's elements.
///
/// `I32` only appears for bias and accumulator tensors; activations and
/// weights are `F32`, `F16` or `I8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    I8,
    I32,
}

impl DType {
    /// Width of one element in bytes.
    pub fn size_of(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::I8 => 1,
            DType::I32 => 4,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F16)
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, DType::I8)
    }
}

/// A floating-point element the generic kernels can widen to f32.
///
/// The blocked GEMM, im2col and Winograd paths are written once over this
/// trait instead of being duplicated per dtype; f16 operands are widened
/// per element and accumulation always happens in f32.
pub trait Element: Copy + Default + Send + Sync + 'static {
    const DTYPE: DType;

    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}
