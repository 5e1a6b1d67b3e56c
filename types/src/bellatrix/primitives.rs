use ssz_types::VariableList;

use crate::preset::Preset;

pub use alloy_primitives::U256 as Wei;

pub type ExecutionBlockNumber = u64;
pub type Gas = u64;
pub type Transaction<P> = VariableList<u8, <P as Preset>::MaxBytesPerTransaction>;
