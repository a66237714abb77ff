//! Deterministic splay calculation for standalone scheduling.
//!
//! Two clients running the same check must not all fire it on the same
//! millisecond; splay spreads first-fire times deterministically so restarts
//! reproduce the same offset rather than picking a new random one each time.

use md5::{Digest, Md5};

/// Compute the splay, in seconds, for `client:check` against an
/// `interval_ms` schedule. Deterministic: same inputs always produce the
/// same output, so a restarted agent keeps its existing cadence.
pub fn splay_seconds(client: &str, check: &str, interval_ms: u64, now_ms: u64) -> f64 {
    if interval_ms == 0 {
        return 0.0;
    }
    let key = format!("{client}:{check}");
    let digest = Md5::digest(key.as_bytes());
    // The low 8 bytes, read little-endian, give a stable 64-bit hash of the
    // key without pulling in a dedicated hashing crate.
    let mut low8 = [0u8; 8];
    low8.copy_from_slice(&digest[0..8]);
    let hash = u64::from_le_bytes(low8);

    let offset = hash.wrapping_sub(now_ms) % interval_ms;
    offset as f64 / 1000.0
}
