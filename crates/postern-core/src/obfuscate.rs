//! Reversible obfuscation for the stored usage blob.
//!
//! This is keyed byte mixing with an embedded constant — it is **not**
//! encryption and must never be described as such. Anyone with this source
//! (or a debugger and five minutes) can invert it.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Casual inspection of the slot file — counts and
//!   fingerprints are not greppable plaintext.
//! - **Does not block:** Anyone who reads this module. No access-control
//!   decision may depend on it.
//!
//! `encode` salts each output with random bytes, so repeated encodings of
//! the same plaintext differ; `decode` is the exact inverse. Both directions
//! fail open: malformed input comes back unchanged rather than erroring, so
//! a corrupted slot degrades to a parse failure one layer up instead of a
//! crash here.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Mixing key. A constant, embedded, and deliberately unimpressive.
const KEY: &[u8] = b"postern-quota-slot";

const SALT_LEN: usize = 8;

/// Obfuscate `plaintext` into an opaque storable string.
///
/// Output layout before base64: `salt (8 bytes) || mixed bytes`, where each
/// plaintext byte is XORed with a key byte and a salt byte in cycle.
pub fn encode(plaintext: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let mut out = Vec::with_capacity(SALT_LEN + plaintext.len());
    out.extend_from_slice(&salt);
    out.extend(mix(plaintext.as_bytes(), &salt));

    BASE64.encode(out)
}

/// Invert [`encode`]. Returns the input unchanged when it is not valid
/// base64, too short to carry a salt, or does not unmix to UTF-8.
pub fn decode(opaque: &str) -> String {
    let Ok(raw) = BASE64.decode(opaque) else {
        return opaque.to_string();
    };
    if raw.len() < SALT_LEN {
        return opaque.to_string();
    }

    let (salt, mixed) = raw.split_at(SALT_LEN);
    match String::from_utf8(mix(mixed, salt)) {
        Ok(plain) => plain,
        Err(_) => opaque.to_string(),
    }
}

/// XOR against the repeating key and salt schedules. Self-inverse.
fn mix(bytes: &[u8], salt: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ KEY[i % KEY.len()] ^ salt[i % salt.len()])
        .collect()
}
