//! SHA-256 over the fixed input shapes used by the state transition.
//!
//! The names encode the bit widths of the concatenated inputs,
//! e.g. `hash_256_64` hashes a 32 byte root followed by a little-endian `u64`.

use alloy_primitives::B256 as H256;
use sha2::{Digest as _, Sha256};

#[must_use]
pub fn hash(bytes: impl AsRef<[u8]>) -> H256 {
    finish(Sha256::new().chain_update(bytes))
}

#[must_use]
pub fn hash_256_256(left: H256, right: H256) -> H256 {
    finish(Sha256::new().chain_update(left).chain_update(right))
}

#[must_use]
pub fn hash_256_8(seed: H256, round: u8) -> H256 {
    finish(Sha256::new().chain_update(seed).chain_update([round]))
}

#[must_use]
pub fn hash_256_8_32(seed: H256, round: u8, position_window: u32) -> H256 {
    finish(
        Sha256::new()
            .chain_update(seed)
            .chain_update([round])
            .chain_update(position_window.to_le_bytes()),
    )
}

#[must_use]
pub fn hash_256_64(root: H256, number: u64) -> H256 {
    finish(
        Sha256::new()
            .chain_update(root)
            .chain_update(number.to_le_bytes()),
    )
}

#[must_use]
pub fn hash_32_64_256(prefix: [u8; 4], number: u64, root: H256) -> H256 {
    finish(
        Sha256::new()
            .chain_update(prefix)
            .chain_update(number.to_le_bytes())
            .chain_update(root),
    )
}

fn finish(hasher: Sha256) -> H256 {
    H256::new(hasher.finalize().into())
}
