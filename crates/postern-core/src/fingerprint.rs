//! Device fingerprint derivation.
//!
//! The fingerprint is the SHA-256 hex digest of every signal probe value
//! joined with a separator that cannot appear inside a value. It is stable
//! for one host/user/configuration, collides across identically configured
//! hosts (accepted), and is recomputed on every call — it is a lookup key,
//! never stored by itself.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::signals;

/// Joins probe values; probes never produce `#`, so the separator is
/// unambiguous.
const SEPARATOR: &str = "###";

const FALLBACK_SUFFIX_LEN: usize = 12;

/// Derive the fingerprint for the current host environment.
///
/// Total: this function cannot fail. When every probe misses — an
/// environment so locked down that no signal at all could be read — it
/// degrades to [`fallback_id`], which is random per call and therefore
/// unstable across runs. That mode is logged loudly; a quota keyed on it
/// effectively resets every run, which is preferred over refusing service.
pub fn generate() -> String {
    let (values, live) = signals::collect();
    if live == 0 {
        tracing::warn!("all signal probes missed — degrading to an unstable fallback id");
        return fallback_id();
    }

    let joined = values
        .iter()
        .map(|(_, value)| value.as_str())
        .collect::<Vec<_>>()
        .join(SEPARATOR);

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Low-quality identifier for the degraded path: OS name plus a random
/// suffix. Distinct on every call.
fn fallback_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(FALLBACK_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}-{}", std::env::consts::OS, suffix)
}
