//! Workspace trust gate.

use async_trait::async_trait;

/// Asks whether the workspace may run code.
///
/// May suspend while the user answers. Caching decisions across requests is
/// up to the implementation.
#[async_trait]
pub trait TrustGate: Send + Sync {
    async fn request_trust(&self, message: &str) -> bool;
}

/// Trust gate with a fixed answer (headless runs, tests).
#[derive(Debug, Clone, Copy)]
pub struct StaticTrustGate {
    trusted: bool,
}

impl StaticTrustGate {
    pub fn new(trusted: bool) -> Self {
        Self { trusted }
    }

    pub fn trusted() -> Self {
        Self::new(true)
    }

    pub fn untrusted() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl TrustGate for StaticTrustGate {
    async fn request_trust(&self, message: &str) -> bool {
        tracing::debug!("Trust requested ({}): {}", self.trusted, message);
        self.trusted
    }
}
