pub use crate::{
    error::Error, public_key::PublicKey, public_key_bytes::PublicKeyBytes, secret_key::SecretKey,
    signature::Signature, signature_bytes::SignatureBytes,
};

pub type AggregatePublicKey = PublicKey;
pub type AggregateSignature = Signature;
pub type AggregateSignatureBytes = SignatureBytes;

/// Ciphersuite of the proof-of-possession scheme used by the beacon chain.
pub const DOMAIN_SEPARATION_TAG: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

macro_rules! compressed_bytes {
    ($name: ident, $size: ty) => {
        #[derive(
            Clone,
            PartialEq,
            Eq,
            Hash,
            Default,
            ::ssz_derive::Encode,
            ::ssz_derive::Decode,
            ::tree_hash_derive::TreeHash,
        )]
        pub struct $name {
            inner: ::ssz_types::FixedVector<u8, $size>,
        }

        impl $name {
            pub const SIZE: usize = <$size as ::ssz_types::typenum::Unsigned>::USIZE;

            #[must_use]
            pub fn as_bytes(&self) -> &[u8] {
                &self.inner
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, $crate::Error> {
                if bytes.len() != Self::SIZE {
                    return Err($crate::Error::InvalidLength {
                        expected: Self::SIZE,
                        actual: bytes.len(),
                    });
                }

                Ok(Self {
                    inner: bytes.to_vec().into(),
                })
            }
        }

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, formatter: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                formatter.write_str(&::alloy_primitives::hex::encode_prefixed(self.as_bytes()))
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&::alloy_primitives::hex::encode_prefixed(self.as_bytes()))
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D: ::serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let string = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                let bytes = ::alloy_primitives::hex::decode(string)
                    .map_err(::serde::de::Error::custom)?;
                Self::from_slice(&bytes).map_err(::serde::de::Error::custom)
            }
        }
    };
}

mod error;
mod public_key;
mod public_key_bytes;
mod secret_key;
mod signature;
mod signature_bytes;
