//! Deterministic bucketing for percentage rollouts.
use sha1::{Digest, Sha1};

/// Number of equal slots the rollout bucket space is divided into.
pub const BUCKET_COUNT: u32 = 10_000;

pub trait Bucketer {
    /// Map `(hash_key, salt)` to a bucket in `[0, BUCKET_COUNT)`.
    fn bucket(&self, hash_key: &str, salt: &str) -> u32;
}

/// The default (and only) bucketer.
///
/// Clients and servers must agree on bucket assignment for a given
/// `(key, salt)` pair, so the digest and the byte selection below are part
/// of the wire contract. This is a distribution function, not a security
/// boundary.
pub struct Sha1Bucketer;

impl Bucketer for Sha1Bucketer {
    fn bucket(&self, hash_key: &str, salt: &str) -> u32 {
        let mut hasher = Sha1::new();
        hasher.update(hash_key.as_bytes());
        hasher.update(salt.as_bytes());
        let digest = hasher.finalize();
        // The digest tail must widen as an unsigned integer; sign
        // extension would disagree with other SDKs on half the keys.
        let tail: [u8; 4] = digest[16..20]
            .try_into()
            .expect("SHA-1 digest is 20 bytes");
        u32::from_be_bytes(tail) % BUCKET_COUNT
    }
}
