use ssz_types::typenum::U48;

compressed_bytes!(PublicKeyBytes, U48);
