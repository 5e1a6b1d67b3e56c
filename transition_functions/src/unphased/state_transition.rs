use anyhow::{ensure, Result};
use tree_hash::TreeHash as _;
use types::{phase0::primitives::H256, preset::Preset, traits::BeaconState};

use crate::unphased::Error;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StateRootPolicy {
    Verify,
    Trust,
}

impl StateRootPolicy {
    pub fn verify<P: Preset>(self, state: &impl BeaconState<P>, in_block: H256) -> Result<()> {
        match self {
            Self::Verify => {
                let computed = state.tree_hash_root();

                ensure!(
                    computed == in_block,
                    Error::StateRootMismatch { computed, in_block },
                );
            }
            // Nothing is cached, so the root in the block is not used at all.
            Self::Trust => {}
        }

        Ok(())
    }
}
