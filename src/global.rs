//! Process-wide TLS state.
//!
//! One [`GlobalContext`] is created at process startup before any daemon
//! exists. It holds the cryptographic provider shared by every daemon and
//! session, and is cheap to clone; clones share the same provider. It must
//! outlive every daemon built from it, which the `Arc` inside enforces
//! even if the original handle is dropped early.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use tracing::debug;

/// Process-wide cryptographic state. Initialize exactly once.
#[derive(Clone)]
pub struct GlobalContext {
    provider: Arc<CryptoProvider>,
}

impl GlobalContext {
    /// Set up global TLS state for the process.
    pub fn init() -> Self {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        debug!("global TLS state initialized");
        Self { provider }
    }

    /// Handle to the shared cryptographic provider.
    ///
    /// Exposed so externally supplied engines can build their own
    /// `rustls` configurations against the same provider.
    pub fn provider(&self) -> Arc<CryptoProvider> {
        Arc::clone(&self.provider)
    }
}

impl std::fmt::Debug for GlobalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalContext").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
