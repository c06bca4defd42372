//! # Dual Reference Counts
//!
//! Objects that can be referenced both by users and by other objects carry
//! two counters:
//!
//! ```text
//!   external ── user-visible lifetime (create, retain, release)
//!   internal ── everything that keeps the native resource alive:
//!               every external reference plus every dependent object
//! ```
//!
//! The native resource is freed only once the internal count reaches zero,
//! which implies the external count already did.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};

// =============================================================================
// REF COUNTS
// =============================================================================

/// External and internal reference counts
#[derive(Debug)]
pub struct RefCounts {
    external: AtomicU32,
    internal: AtomicU32,
}

impl RefCounts {
    /// Counts for a freshly created object: one external, one internal
    pub const fn new() -> Self {
        Self::with_counts(1, 1)
    }

    /// Counts with explicit starting values
    pub const fn with_counts(external: u32, internal: u32) -> Self {
        Self {
            external: AtomicU32::new(external),
            internal: AtomicU32::new(internal),
        }
    }

    /// Current external count
    #[inline]
    pub fn external(&self) -> u32 {
        self.external.load(Ordering::Acquire)
    }

    /// Current internal count
    #[inline]
    pub fn internal(&self) -> u32 {
        self.internal.load(Ordering::Acquire)
    }

    /// User retain: bumps both counts
    pub fn retain(&self) -> Result<()> {
        increment(&self.external)?;
        self.retain_internal()
    }

    /// User release: drops one external reference
    ///
    /// Returns the remaining external count. The matching internal
    /// reference must be dropped by the caller with
    /// [`release_internal`](Self::release_internal) once any external-zero
    /// teardown has run.
    pub fn release_external(&self) -> Result<u32> {
        decrement(&self.external)
    }

    /// Take an internal reference on behalf of a dependent object
    pub fn retain_internal(&self) -> Result<()> {
        increment(&self.internal)
    }

    /// Drop an internal reference; returns the remaining internal count
    pub fn release_internal(&self) -> Result<u32> {
        decrement(&self.internal)
    }
}

impl Default for RefCounts {
    fn default() -> Self {
        Self::new()
    }
}

fn increment(counter: &AtomicU32) -> Result<()> {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            if n == 0 {
                // resurrecting a dead object is never legal
                None
            } else {
                n.checked_add(1)
            }
        })
        .map(|_| ())
        .map_err(|_| Error::InvalidOperation)
}

fn decrement(counter: &AtomicU32) -> Result<u32> {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .map(|prev| prev - 1)
        .map_err(|_| {
            log::warn!("RefCounts: release of an object with no references left");
            Error::InvalidOperation
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_counts() {
        let rc = RefCounts::new();
        assert_eq!(rc.external(), 1);
        assert_eq!(rc.internal(), 1);
    }

    #[test]
    fn test_retain_bumps_both() {
        let rc = RefCounts::new();
        rc.retain().unwrap();
        assert_eq!(rc.external(), 2);
        assert_eq!(rc.internal(), 2);
    }

    #[test]
    fn test_internal_outlives_external() {
        let rc = RefCounts::new();
        rc.retain_internal().unwrap();
        assert_eq!(rc.release_external().unwrap(), 0);
        assert_eq!(rc.release_internal().unwrap(), 1);
        assert_eq!(rc.release_internal().unwrap(), 0);
    }

    #[test]
    fn test_underflow_and_resurrection() {
        let rc = RefCounts::with_counts(0, 0);
        assert_eq!(rc.release_external(), Err(Error::InvalidOperation));
        assert_eq!(rc.release_internal(), Err(Error::InvalidOperation));
        assert_eq!(rc.retain(), Err(Error::InvalidOperation));
    }
}
