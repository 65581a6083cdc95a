//! FNV-1a content digest.
//!
//! Saves embed a fingerprint of the content pack identity so a save
//! produced against one pack is never hydrated into another. The digest
//! covers `{id, moduleIds, version}` in canonical (key-sorted) JSON and
//! is formatted `fnv1a-XXXXXXXX` (32-bit, lowercase hex). It is not
//! cryptographically secure — it is a fast compatibility check.

use serde_json::json;

use crate::pack::ContentPack;

/// FNV-1a offset basis for 32-bit.
const FNV_OFFSET: u32 = 0x811C_9DC5;
/// FNV-1a prime for 32-bit.
const FNV_PRIME: u32 = 16_777_619;

/// Hash a byte slice with 32-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Compute the formatted digest for a content pack.
///
/// Canonicalization relies on `serde_json`'s sorted object keys, so the
/// byte stream is independent of field declaration order.
pub fn content_digest(pack: &ContentPack) -> String {
    let identity = json!({
        "id": pack.id,
        "moduleIds": pack.module_ids,
        "version": pack.version,
    });
    // Object keys serialize in sorted order, giving a canonical byte stream.
    let canonical = identity.to_string();
    format!("fnv1a-{:08x}", fnv1a(canonical.as_bytes()))
}
