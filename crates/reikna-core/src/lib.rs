//! Core data model for the reikna inference-kernel engine.
//!
//! This crate holds the leaf types the compute crates build on: tensor
//! descriptors with typed buffers, quantization parameters, memory-layout
//! tags with NCHW ⇄ NC1HWC0 conversion, and the fixed-point requantization
//! arithmetic shared by every int8 kernel.

pub mod dtype;
pub mod layout;
pub mod quantize;
pub mod tensor;

pub use dtype::{DType, Element};
pub use layout::{nc1hwc0_to_nchw, nchw_to_nc1hwc0, Layout};
pub use quantize::{dequantize, quantize, quantize_multiplier, requantize, RequantParams};
pub use tensor::{QuantInfo, QuantParam, Tensor, TensorData};
