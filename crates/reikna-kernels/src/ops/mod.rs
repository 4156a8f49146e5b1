//! Operator surface: prepare once, execute repeatedly.
//!
//! Each operator follows the same shape: `prepare` validates descriptors,
//! picks a strategy, and returns an owned `Prepared*` value holding the
//! reordered/transformed weights and derived quantization parameters;
//! `execute` consumes it read-only. Callers that share weight tensors
//! between operators can prepare them concurrently — nothing is mutated in
//! place.

pub mod conv2d;
pub mod fullyconnected;
pub mod matmul;
pub mod maxpool;
