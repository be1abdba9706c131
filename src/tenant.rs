//! Tenant identity.
//!
//! Every record and every operation in the engine is scoped by a [`TenantId`].
//! The id is supplied by the caller's authenticated context; the store layer
//! re-validates it on every access so a caller bug cannot leak data across
//! tenants.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

/// Unique, niche-optimized identifier for a tenant.
///
/// Uses `NonZeroU64` so that `Option<TenantId>` is the same size as `TenantId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TenantId(NonZeroU64);

impl TenantId {
    /// Create a `TenantId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(TenantId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tenant:{}", self.0)
    }
}
