//! Engine configuration threaded through operator preparation.
//!
//! Options travel explicitly with every `prepare` call instead of living
//! in process-global state, so two operators prepared with different
//! options can coexist in one process.

use serde::{Deserialize, Serialize};

use crate::capability::Capability;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Overrides the probed vector register width (bytes). `Some(0)` forces
    /// the scalar paths.
    pub vector_bytes: Option<usize>,
    /// Overrides the probed matrix register width (bytes).
    pub matrix_bytes: Option<usize>,
    /// Allows 3x3 stride-1 float convolutions to take the Winograd paths.
    pub allow_winograd: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            vector_bytes: None,
            matrix_bytes: None,
            allow_winograd: true,
        }
    }
}

impl EngineOptions {
    /// The capability these options resolve to: explicit overrides first,
    /// otherwise the hardware probe.
    pub fn capability(&self) -> Capability {
        let detected = Capability::detect();
        let vb = self.vector_bytes.unwrap_or(detected.vector_register_bytes());
        let mb = self.matrix_bytes.unwrap_or(detected.matrix_register_bytes());
        Capability::with_vector_bytes(vb).with_matrix_bytes(mb)
    }

    /// Convenience for tests: options pinned to an explicit capability.
    pub fn with_capability(cap: Capability) -> Self {
        EngineOptions {
            vector_bytes: Some(cap.vector_register_bytes()),
            matrix_bytes: Some(cap.matrix_register_bytes()),
            ..Default::default()
        }
    }
}
