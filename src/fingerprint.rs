//! Content fingerprints for change detection.
//!
//! Firmware clients poll `/get_hash` and refetch tiles only when the
//! fingerprint moved, so the digest must be cheap, short, and stable
//! across processes and architectures. FNV-1a over the raw bytes is
//! plenty: the inputs are multi-hundred-kilobyte pixel buffers and the
//! only requirement is that distinct frames collide with negligible
//! probability.

use std::hash::Hasher;

use fnv::FnvHasher;

/// Computes the fingerprint of a rendered frame.
///
/// The device id and mode string are mixed in ahead of the pixel data so
/// that two devices showing identical content still see distinct
/// fingerprints. Returns 16 lowercase hex characters.
#[must_use]
pub fn fingerprint(rgb: &[u8], mode: &str, device_id: &str) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(device_id.as_bytes());
    hasher.write(&[0]);
    hasher.write(mode.as_bytes());
    hasher.write(&[0]);
    hasher.write(rgb);
    format!("{:016x}", hasher.finish())
}
