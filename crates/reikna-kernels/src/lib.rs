//! Portable operator kernels for neural-network inference.
//!
//! The engine turns convolution, fully-connected, matmul and pooling calls
//! into blocked, packed GEMM invocations sized by a runtime capability
//! probe, with Winograd fast paths for 3x3 stride-1 float convolutions and
//! fixed-point requantization on the int8 paths. Every optimized path has a
//! portable scalar reference behind it; when no optimized precondition
//! holds, the engine falls back and logs, but never fails to produce a
//! correct result.
//!
//! The control flow per operator instance: probe capability → select an
//! algorithm → pack/transform the kernel once (`prepare`) → per call,
//! pack the activations, run the micro-kernel, requantize/store
//! (`execute`).

pub mod capability;
pub mod gemm;
pub mod im2col;
pub mod options;
pub mod ops;
pub mod pack;
pub mod reference;
pub mod winograd;

pub use capability::{gemm_tiles, Capability, GemmTiles};
pub use options::EngineOptions;
pub use ops::conv2d::{self, Conv2dParams, ConvAlgorithm, PreparedConv2d};
pub use ops::fullyconnected::{self, PreparedFullyConnected};
pub use ops::matmul::{self, PreparedMatmul};
pub use ops::maxpool::{self, MaxPool2dParams, PreparedMaxPool2d};

// Re-export the data model so downstream users need a single dependency.
pub use reikna_core::{
    dequantize, quantize, quantize_multiplier, requantize, DType, Element, Layout, QuantInfo,
    QuantParam, RequantParams, Tensor, TensorData,
};
