pub const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;
