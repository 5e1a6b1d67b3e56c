pub use alloy_primitives::{aliases::B32 as H32, Address as H160, B256 as H256};

pub type CommitteeIndex = u64;
pub type DepositIndex = u64;
pub type Epoch = u64;
pub type Gwei = u64;
pub type Slot = u64;
pub type UnixSeconds = u64;
pub type ValidatorIndex = u64;

pub type Domain = H256;
pub type DomainType = H32;
pub type ExecutionAddress = H160;
pub type ExecutionBlockHash = H256;
pub type Version = H32;
