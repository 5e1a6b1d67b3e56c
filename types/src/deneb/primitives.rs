use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::FixedVector;
use tree_hash_derive::TreeHash;
use typenum::U48;

use crate::phase0::primitives::H256;

pub type VersionedHash = H256;

/// Compressed KZG commitment to a blob.
///
/// Encoded and hashed exactly like `Bytes48`. The commitment is never decompressed here.
#[derive(
    Clone, PartialEq, Eq, Hash, Default, Debug, Deserialize, Serialize, Encode, Decode, TreeHash,
)]
#[serde(transparent)]
pub struct KzgCommitment {
    inner: FixedVector<u8, U48>,
}

impl KzgCommitment {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }
}

impl From<[u8; 48]> for KzgCommitment {
    fn from(bytes: [u8; 48]) -> Self {
        Self {
            inner: bytes.to_vec().into(),
        }
    }
}
