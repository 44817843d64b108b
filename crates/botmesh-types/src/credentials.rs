//! Shutdown-authorization credentials.
//!
//! The registry and components treat this as an opaque blob: it is supplied
//! at startup, carried on `Shutdown` frames, and compared by
//! `on_shutdown_requested` hooks. The secret is wiped from memory on drop.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque credentials blob authorizing a remote shutdown request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// An empty blob, used by deployments that do not gate shutdown.
    pub fn none() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `presented` matches this blob.
    pub fn permits(&self, presented: &Credentials) -> bool {
        self.0 == presented.0
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0.is_empty() {
            "Credentials(<not set>)"
        } else {
            "Credentials(<redacted>)"
        })
    }
}
