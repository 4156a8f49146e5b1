//! Runtime probe of SIMD register geometry.
//!
//! Tile sizes for the blocked kernels are derived from the effective
//! vector register byte width of the running target, read once at startup
//! (vector-length-agnostic design). A width of 0 means the capability is
//! absent and every dependent path must take the portable scalar fallback
//! — that fallback is a correctness requirement, not an optimization.
//!
//! The probe is a pure read with no shared state, so `detect()` is
//! idempotent and safe to call concurrently. Tests construct capabilities
//! explicitly instead of probing, which keeps kernel selection unit-testable
//! without the target hardware.

use reikna_core::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    vector_bytes: usize,
    matrix_bytes: usize,
}

impl Capability {
    /// Probes the running target.
    pub fn detect() -> Self {
        Capability {
            vector_bytes: detect_vector_bytes(),
            // No commodity target this crate builds for carries a matrix
            // extension; tests inject one via `with_matrix_bytes`.
            matrix_bytes: 0,
        }
    }

    /// A capability with no vector or matrix registers: forces the scalar
    /// reference paths everywhere.
    pub fn scalar() -> Self {
        Capability {
            vector_bytes: 0,
            matrix_bytes: 0,
        }
    }

    pub fn with_vector_bytes(vector_bytes: usize) -> Self {
        Capability {
            vector_bytes,
            matrix_bytes: 0,
        }
    }

    pub fn with_matrix_bytes(mut self, matrix_bytes: usize) -> Self {
        self.matrix_bytes = matrix_bytes;
        self
    }

    /// Effective vector register width in bytes; 0 when absent.
    pub fn vector_register_bytes(&self) -> usize {
        self.vector_bytes
    }

    /// Effective matrix register row width in bytes; 0 when absent.
    pub fn matrix_register_bytes(&self) -> usize {
        self.matrix_bytes
    }

    pub fn has_vector(&self) -> bool {
        self.vector_bytes > 0
    }
}

fn detect_vector_bytes() -> usize {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        if is_x86_feature_detected!("avx2") {
            return 32;
        }
        if is_x86_feature_detected!("sse2") {
            return 16;
        }
        0
    }
    #[cfg(target_arch = "aarch64")]
    {
        16 // NEON is baseline on aarch64
    }
    #[cfg(all(target_arch = "wasm32", target_feature = "simd128"))]
    {
        16
    }
    #[cfg(not(any(
        target_arch = "x86",
        target_arch = "x86_64",
        target_arch = "aarch64",
        all(target_arch = "wasm32", target_feature = "simd128")
    )))]
    {
        0
    }
}

/// Block geometry for one GEMM invocation.
///
/// `m` is the largest row block (rows iterate greedily m, m/2, ... 1),
/// `n` the packed column-tile width, `k_interleave` the K-direction packing
/// depth (4 for the int8 dot-product layout, 1 otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmTiles {
    pub m: usize,
    pub n: usize,
    pub k_interleave: usize,
}

/// Tile geometry as a pure function of (capability, dtype).
///
/// fp32 packs 12-wide column tiles on 128-bit vectors and 16-wide on
/// 256-bit; fp16 doubles the lane count; int8 packs narrower tiles but
/// interleaves K in groups of four. Without a vector unit the blocked
/// loop still runs, at width 4.
pub fn gemm_tiles(cap: Capability, dtype: DType) -> GemmTiles {
    let vb = cap.vector_register_bytes();
    match dtype {
        DType::F32 => GemmTiles {
            m: 8,
            n: match vb {
                0 => 4,
                b if b >= 32 => 16,
                _ => 12,
            },
            k_interleave: 1,
        },
        DType::F16 => GemmTiles {
            m: 8,
            n: match vb {
                0 => 4,
                b if b >= 32 => 32,
                _ => 16,
            },
            k_interleave: 1,
        },
        DType::I8 => GemmTiles {
            m: 8,
            n: match vb {
                0 => 4,
                b if b >= 32 => 16,
                _ => 8,
            },
            k_interleave: 4,
        },
        DType::I32 => GemmTiles {
            m: 8,
            n: 4,
            k_interleave: 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_are_pure_in_capability() {
        let a = gemm_tiles(Capability::with_vector_bytes(16), DType::F32);
        let b = gemm_tiles(Capability::with_vector_bytes(16), DType::F32);
        assert_eq!(a, b);
        assert_eq!(a.n, 12);
        assert_eq!(a.k_interleave, 1);
    }

    #[test]
    fn wider_vectors_widen_tiles() {
        assert_eq!(gemm_tiles(Capability::with_vector_bytes(32), DType::F32).n, 16);
        assert_eq!(gemm_tiles(Capability::with_vector_bytes(32), DType::F16).n, 32);
        assert_eq!(gemm_tiles(Capability::with_vector_bytes(16), DType::I8).n, 8);
        assert_eq!(gemm_tiles(Capability::with_vector_bytes(32), DType::I8).n, 16);
    }

    #[test]
    fn absent_capability_still_yields_valid_tiles() {
        let t = gemm_tiles(Capability::scalar(), DType::F32);
        assert!(t.n >= 1 && t.m >= 1);
    }

    #[test]
    fn int8_interleaves_k_by_four() {
        assert_eq!(gemm_tiles(Capability::scalar(), DType::I8).k_interleave, 4);
        assert_eq!(gemm_tiles(Capability::with_vector_bytes(16), DType::I8).k_interleave, 4);
    }

    #[test]
    fn detect_is_idempotent() {
        assert_eq!(Capability::detect(), Capability::detect());
    }
}
