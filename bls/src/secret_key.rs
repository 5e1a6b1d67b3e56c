use blst::min_pk::SecretKey as RawSecretKey;

use crate::{
    error::Error, public_key::PublicKey, signature::Signature, DOMAIN_SEPARATION_TAG,
};

pub struct SecretKey(RawSecretKey);

impl SecretKey {
    /// Derives a key from input keying material as described in EIP-2333.
    pub fn from_ikm(ikm: &[u8; 32]) -> Result<Self, Error> {
        RawSecretKey::key_gen(ikm, &[])
            .map(Self)
            .map_err(|_| Error::InvalidSecretKey)
    }

    /// Parses a big-endian scalar. Zero and values not below the curve order are rejected.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, Error> {
        RawSecretKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| Error::InvalidSecretKey)
    }

    #[must_use]
    pub fn to_public_key(&self) -> PublicKey {
        self.0.sk_to_pk().into()
    }

    #[must_use]
    pub fn sign(&self, message: impl AsRef<[u8]>) -> Signature {
        self.0
            .sign(message.as_ref(), DOMAIN_SEPARATION_TAG, &[])
            .into()
    }
}
