use core::num::NonZeroU64;

use hex_literal::hex;
use nonzero_ext::nonzero;
use typenum::{U33, U4};

use crate::phase0::primitives::{DomainType, Epoch, Slot, H32};

pub const BASE_REWARDS_PER_EPOCH: NonZeroU64 = nonzero!(4_u64);
pub const BLS_WITHDRAWAL_PREFIX: u8 = 0x00;
pub const DEPOSIT_CONTRACT_TREE_DEPTH: u64 = 32;
pub const DOMAIN_BEACON_ATTESTER: DomainType = H32::new(hex!("01000000"));
pub const DOMAIN_BEACON_PROPOSER: DomainType = H32::new(hex!("00000000"));
pub const DOMAIN_DEPOSIT: DomainType = H32::new(hex!("03000000"));
pub const DOMAIN_RANDAO: DomainType = H32::new(hex!("02000000"));
pub const DOMAIN_VOLUNTARY_EXIT: DomainType = H32::new(hex!("04000000"));
pub const ETH1_ADDRESS_WITHDRAWAL_PREFIX: u8 = 0x01;
pub const FAR_FUTURE_EPOCH: Epoch = Epoch::MAX;
pub const GENESIS_EPOCH: Epoch = 0;
pub const GENESIS_SLOT: Slot = 0;
pub const MAX_RANDOM_BYTE: u64 = (1 << 8) - 1;

/// `DEPOSIT_CONTRACT_TREE_DEPTH + 1`. The extra node mixes in the deposit count.
pub type DepositProofLength = U33;
pub type JustificationBitsLength = U4;
