//! CRC32 hashing for deterministic tenant scoping.
//!
//! The in-memory store bootstrapper maps each tenant onto one of a bounded
//! pool of backend indices:
//!
//! ```text
//! index = base_offset + (crc32(tenant) mod pool_size)
//! ```
//!
//! The pool size caps backend fan-out regardless of how many tenants exist.
//! Two tenants may land on the same index; that collision is the accepted
//! price of bounded fan-out, and the tenant-scoped key prefix written
//! alongside the index keeps their keys apart.

use crate::tenant::TenantId;

/// Computes the IEEE CRC32 of a tenant identifier's UTF-8 bytes.
///
/// # Examples
///
/// ```
/// use switchyard_core::hash::crc32;
///
/// assert_eq!(crc32(""), 0);
/// assert_eq!(crc32("123456789"), 0xCBF4_3926);
/// ```
#[must_use]
pub fn crc32(s: &str) -> u32 {
    crc32fast::hash(s.as_bytes())
}

/// Maps a tenant onto `[base_offset, base_offset + pool_size)`.
///
/// Returns `None` when `pool_size` is zero or the result would overflow
/// `i64`; configuration validation rejects both before any tenant is
/// scoped, so callers treat `None` as an invalid scoped value.
///
/// # Examples
///
/// ```
/// use switchyard_core::hash::{crc32, scoped_index};
/// use switchyard_core::TenantId;
///
/// let acme = TenantId::new("acme").unwrap();
/// let index = scoped_index(&acme, 10, 100).unwrap();
/// assert_eq!(index, 10 + i64::from(crc32("acme") % 100));
/// ```
#[must_use]
pub fn scoped_index(tenant: &TenantId, base_offset: i64, pool_size: u32) -> Option<i64> {
    if pool_size == 0 {
        return None;
    }
    let slot = crc32(tenant.as_str()) % pool_size;
    base_offset.checked_add(i64::from(slot))
}
