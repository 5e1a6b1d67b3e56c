use helper_functions::accessors;
use tree_hash::TreeHash as _;
use types::{phase0::primitives::Slot, preset::Preset, traits::BeaconState};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessSlots {
    Always,
    IfNeeded,
    Never,
}

impl ProcessSlots {
    #[must_use]
    pub fn should_process<P: Preset>(self, state: &impl BeaconState<P>, block_slot: Slot) -> bool {
        match self {
            Self::Always => true,
            // Not `<`. Blocks that would rewind the state must reach slot processing in `combined`,
            // which rejects them with `SlotNotLater`.
            Self::IfNeeded => state.slot() != block_slot,
            Self::Never => false,
        }
    }
}

pub fn process_slot<P: Preset>(state: &mut impl BeaconState<P>) {
    let index = accessors::ring_index::<P::SlotsPerHistoricalRoot>(state.slot());

    // > Cache state root
    let previous_state_root = state.tree_hash_root();
    state.state_roots_mut()[index] = previous_state_root;

    // > Cache latest block header state root
    if state.latest_block_header().state_root.is_zero() {
        state.latest_block_header_mut().state_root = previous_state_root;
    }

    // > Cache block root
    let previous_block_root = state.latest_block_header().tree_hash_root();
    state.block_roots_mut()[index] = previous_block_root;
}

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use types::{
        altair::beacon_state::BeaconState as AltairBeaconState, phase0::primitives::H256,
        preset::Minimal,
    };

    use super::*;

    #[test_case(ProcessSlots::Always, 3 => true)]
    #[test_case(ProcessSlots::Always, 5 => true)]
    #[test_case(ProcessSlots::IfNeeded, 3 => false)]
    #[test_case(ProcessSlots::IfNeeded, 5 => true)]
    #[test_case(ProcessSlots::Never, 5 => false)]
    fn should_process(process_slots: ProcessSlots, block_slot: Slot) -> bool {
        let state = AltairBeaconState::<Minimal> {
            slot: 3,
            ..AltairBeaconState::default()
        };

        process_slots.should_process(&state, block_slot)
    }

    #[test]
    fn process_slot_caches_roots_and_backfills_header() {
        let mut state = AltairBeaconState::<Minimal> {
            slot: 67,
            ..AltairBeaconState::default()
        };

        let pre_state_root = state.tree_hash_root();

        process_slot(&mut state);

        // 67 mod 64 = 3
        assert_eq!(state.state_roots[3], pre_state_root);
        assert_eq!(state.latest_block_header.state_root, pre_state_root);
        assert_eq!(
            state.block_roots[3],
            state.latest_block_header.tree_hash_root(),
        );
        assert_eq!(state.slot, 67);
    }

    #[test]
    fn process_slot_keeps_existing_header_state_root() {
        let existing = H256::repeat_byte(7);

        let mut state = AltairBeaconState::<Minimal>::default();
        state.latest_block_header.state_root = existing;

        process_slot(&mut state);

        assert_eq!(state.latest_block_header.state_root, existing);
        assert_ne!(state.state_roots[0], existing);
    }
}
