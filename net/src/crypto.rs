use sha2::digest::FixedOutput;
use sha2::{Digest, Sha256};

/// Single SHA-256 round. Exposed mainly so `hash256` can be expressed as
/// two calls to it; most callers want [`hash256`].
pub fn sha256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::default();
    hasher.update(input);
    hasher.finalize_fixed().into()
}

/// Bitcoin's double-SHA-256, used for message checksums, block header
/// hashes, and the header-sync locator.
pub fn hash256(input: &[u8]) -> [u8; 32] {
    sha256(&sha256(input))
}
