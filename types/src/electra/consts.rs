use crate::phase0::primitives::{DepositIndex, Gwei};

pub const COMPOUNDING_WITHDRAWAL_PREFIX: u8 = 0x02;

/// Amount in a `WithdrawalRequest` that requests a full exit.
pub const FULL_EXIT_REQUEST_AMOUNT: Gwei = 0;

pub const UNSET_DEPOSIT_REQUESTS_START_INDEX: DepositIndex = u64::MAX;
