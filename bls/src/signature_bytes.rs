use ssz_types::typenum::U96;

compressed_bytes!(SignatureBytes, U96);

impl SignatureBytes {
    /// Compressed encoding of the point at infinity.
    ///
    /// This is the only valid signature over an empty set of signers.
    #[must_use]
    pub fn empty() -> Self {
        let mut bytes = vec![0; Self::SIZE];
        bytes[0] = 0xc0;

        Self {
            inner: bytes.into(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }
}
