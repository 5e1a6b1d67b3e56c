use std::sync::Arc;

use bls::SignatureBytes;
use derive_more::From;
use duplicate::duplicate_item;
use enum_iterator::Sequence as _;
use ssz::{Decode, DecodeError, Encode};
use static_assertions::const_assert_eq;
use tree_hash::{PackedEncoding, TreeHash, TreeHashType};
use variant_count::VariantCount;

use crate::{
    altair::{
        beacon_state::BeaconState as AltairBeaconState,
        containers::SignedBeaconBlock as AltairSignedBeaconBlock,
    },
    bellatrix::{
        beacon_state::BeaconState as BellatrixBeaconState,
        containers::SignedBeaconBlock as BellatrixSignedBeaconBlock,
    },
    capella::{
        beacon_state::BeaconState as CapellaBeaconState,
        containers::SignedBeaconBlock as CapellaSignedBeaconBlock,
    },
    config::Config,
    deneb::{
        beacon_state::BeaconState as DenebBeaconState,
        containers::SignedBeaconBlock as DenebSignedBeaconBlock,
    },
    electra::{
        beacon_state::BeaconState as ElectraBeaconState,
        containers::SignedBeaconBlock as ElectraSignedBeaconBlock,
    },
    nonstandard::Phase,
    phase0::{
        beacon_state::BeaconState as Phase0BeaconState,
        containers::{BeaconBlockHeader, SignedBeaconBlock as Phase0SignedBeaconBlock},
        primitives::{Slot, UnixSeconds, ValidatorIndex, H256},
    },
    preset::{Mainnet, Preset},
    traits::BeaconState as _,
};

/// State of any supported phase.
///
/// Cloning is cheap. Mutation goes through [`Arc::make_mut`] in [`crate::traits::BeaconState`],
/// which clones the outer struct (and with it only the `Arc`s of its collections) when shared.
#[derive(Clone, PartialEq, Eq, Debug, From, VariantCount)]
pub enum BeaconState<P: Preset> {
    Phase0(Arc<Phase0BeaconState<P>>),
    Altair(Arc<AltairBeaconState<P>>),
    Bellatrix(Arc<BellatrixBeaconState<P>>),
    Capella(Arc<CapellaBeaconState<P>>),
    Deneb(Arc<DenebBeaconState<P>>),
    Electra(Arc<ElectraBeaconState<P>>),
}

const_assert_eq!(BeaconState::<Mainnet>::VARIANT_COUNT, Phase::CARDINALITY);

#[duplicate_item(
    implementor;
    [Phase0BeaconState];
    [AltairBeaconState];
    [BellatrixBeaconState];
    [CapellaBeaconState];
    [DenebBeaconState];
    [ElectraBeaconState];
)]
impl<P: Preset> From<implementor<P>> for BeaconState<P> {
    fn from(state: implementor<P>) -> Self {
        Arc::new(state).into()
    }
}

impl<P: Preset> BeaconState<P> {
    /// Decodes a state whose layout is determined by the phase active at its slot.
    pub fn from_ssz_bytes(config: &Config, bytes: &[u8]) -> Result<Self, DecodeError> {
        // There are 2 fixed parts before `state.slot`:
        // - The contents of `state.genesis_time`.
        // - The contents of `state.genesis_validators_root`.
        let slot_start =
            <UnixSeconds as Decode>::ssz_fixed_len() + <H256 as Decode>::ssz_fixed_len();
        let slot = read_slot(bytes, slot_start)?;

        let state = match config.phase_at_slot::<P>(slot) {
            Phase::Phase0 => Self::Phase0(Arc::new(Decode::from_ssz_bytes(bytes)?)),
            Phase::Altair => Self::Altair(Arc::new(Decode::from_ssz_bytes(bytes)?)),
            Phase::Bellatrix => Self::Bellatrix(Arc::new(Decode::from_ssz_bytes(bytes)?)),
            Phase::Capella => Self::Capella(Arc::new(Decode::from_ssz_bytes(bytes)?)),
            Phase::Deneb => Self::Deneb(Arc::new(Decode::from_ssz_bytes(bytes)?)),
            Phase::Electra => Self::Electra(Arc::new(Decode::from_ssz_bytes(bytes)?)),
        };

        debug_assert_eq!(slot, state.slot());

        Ok(state)
    }

    #[must_use]
    pub fn to_ssz_bytes(&self) -> Vec<u8> {
        match self {
            Self::Phase0(state) => state.as_ssz_bytes(),
            Self::Altair(state) => state.as_ssz_bytes(),
            Self::Bellatrix(state) => state.as_ssz_bytes(),
            Self::Capella(state) => state.as_ssz_bytes(),
            Self::Deneb(state) => state.as_ssz_bytes(),
            Self::Electra(state) => state.as_ssz_bytes(),
        }
    }

    #[must_use]
    pub fn phase0(&self) -> Option<&Phase0BeaconState<P>> {
        match self {
            Self::Phase0(state) => Some(state.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn altair(&self) -> Option<&AltairBeaconState<P>> {
        match self {
            Self::Altair(state) => Some(state.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn bellatrix(&self) -> Option<&BellatrixBeaconState<P>> {
        match self {
            Self::Bellatrix(state) => Some(state.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn capella(&self) -> Option<&CapellaBeaconState<P>> {
        match self {
            Self::Capella(state) => Some(state.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn deneb(&self) -> Option<&DenebBeaconState<P>> {
        match self {
            Self::Deneb(state) => Some(state.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn electra(&self) -> Option<&ElectraBeaconState<P>> {
        match self {
            Self::Electra(state) => Some(state.as_ref()),
            _ => None,
        }
    }
}

impl<P: Preset> TreeHash for BeaconState<P> {
    fn tree_hash_type() -> TreeHashType {
        TreeHashType::Container
    }

    fn tree_hash_packed_encoding(&self) -> PackedEncoding {
        unreachable!("containers are never packed")
    }

    fn tree_hash_packing_factor() -> usize {
        unreachable!("containers are never packed")
    }

    fn tree_hash_root(&self) -> H256 {
        match self {
            Self::Phase0(state) => state.tree_hash_root(),
            Self::Altair(state) => state.tree_hash_root(),
            Self::Bellatrix(state) => state.tree_hash_root(),
            Self::Capella(state) => state.tree_hash_root(),
            Self::Deneb(state) => state.tree_hash_root(),
            Self::Electra(state) => state.tree_hash_root(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, From, VariantCount)]
pub enum SignedBeaconBlock<P: Preset> {
    Phase0(Phase0SignedBeaconBlock<P>),
    Altair(AltairSignedBeaconBlock<P>),
    Bellatrix(BellatrixSignedBeaconBlock<P>),
    Capella(CapellaSignedBeaconBlock<P>),
    Deneb(DenebSignedBeaconBlock<P>),
    Electra(ElectraSignedBeaconBlock<P>),
}

const_assert_eq!(SignedBeaconBlock::<Mainnet>::VARIANT_COUNT, Phase::CARDINALITY);

impl<P: Preset> SignedBeaconBlock<P> {
    /// Decodes a block whose layout is determined by the phase active at its slot.
    pub fn from_ssz_bytes(config: &Config, bytes: &[u8]) -> Result<Self, DecodeError> {
        // There are 2 fixed parts before `block.message.slot`:
        // - The offset of `block.message`.
        // - The contents of `block.signature`.
        let slot_start = ssz::BYTES_PER_LENGTH_OFFSET + SignatureBytes::SIZE;
        let slot = read_slot(bytes, slot_start)?;

        let block = match config.phase_at_slot::<P>(slot) {
            Phase::Phase0 => Self::Phase0(Decode::from_ssz_bytes(bytes)?),
            Phase::Altair => Self::Altair(Decode::from_ssz_bytes(bytes)?),
            Phase::Bellatrix => Self::Bellatrix(Decode::from_ssz_bytes(bytes)?),
            Phase::Capella => Self::Capella(Decode::from_ssz_bytes(bytes)?),
            Phase::Deneb => Self::Deneb(Decode::from_ssz_bytes(bytes)?),
            Phase::Electra => Self::Electra(Decode::from_ssz_bytes(bytes)?),
        };

        debug_assert_eq!(slot, block.slot());

        Ok(block)
    }

    #[must_use]
    pub fn to_ssz_bytes(&self) -> Vec<u8> {
        match self {
            Self::Phase0(block) => block.as_ssz_bytes(),
            Self::Altair(block) => block.as_ssz_bytes(),
            Self::Bellatrix(block) => block.as_ssz_bytes(),
            Self::Capella(block) => block.as_ssz_bytes(),
            Self::Deneb(block) => block.as_ssz_bytes(),
            Self::Electra(block) => block.as_ssz_bytes(),
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Phase0(_) => Phase::Phase0,
            Self::Altair(_) => Phase::Altair,
            Self::Bellatrix(_) => Phase::Bellatrix,
            Self::Capella(_) => Phase::Capella,
            Self::Deneb(_) => Phase::Deneb,
            Self::Electra(_) => Phase::Electra,
        }
    }

    #[duplicate_item(
        field            return_type;
        [slot]           [Slot];
        [proposer_index] [ValidatorIndex];
        [parent_root]    [H256];
        [state_root]     [H256];
    )]
    #[must_use]
    pub const fn field(&self) -> return_type {
        match self {
            Self::Phase0(block) => block.message.field,
            Self::Altair(block) => block.message.field,
            Self::Bellatrix(block) => block.message.field,
            Self::Capella(block) => block.message.field,
            Self::Deneb(block) => block.message.field,
            Self::Electra(block) => block.message.field,
        }
    }

    #[must_use]
    pub const fn signature(&self) -> &SignatureBytes {
        match self {
            Self::Phase0(block) => &block.signature,
            Self::Altair(block) => &block.signature,
            Self::Bellatrix(block) => &block.signature,
            Self::Capella(block) => &block.signature,
            Self::Deneb(block) => &block.signature,
            Self::Electra(block) => &block.signature,
        }
    }

    /// Hash tree root of the unsigned block. This is the block root used everywhere else.
    #[must_use]
    pub fn message_root(&self) -> H256 {
        match self {
            Self::Phase0(block) => block.message.tree_hash_root(),
            Self::Altair(block) => block.message.tree_hash_root(),
            Self::Bellatrix(block) => block.message.tree_hash_root(),
            Self::Capella(block) => block.message.tree_hash_root(),
            Self::Deneb(block) => block.message.tree_hash_root(),
            Self::Electra(block) => block.message.tree_hash_root(),
        }
    }

    #[must_use]
    pub fn to_header(&self) -> BeaconBlockHeader {
        let body_root = match self {
            Self::Phase0(block) => block.message.body.tree_hash_root(),
            Self::Altair(block) => block.message.body.tree_hash_root(),
            Self::Bellatrix(block) => block.message.body.tree_hash_root(),
            Self::Capella(block) => block.message.body.tree_hash_root(),
            Self::Deneb(block) => block.message.body.tree_hash_root(),
            Self::Electra(block) => block.message.body.tree_hash_root(),
        };

        BeaconBlockHeader {
            slot: self.slot(),
            proposer_index: self.proposer_index(),
            parent_root: self.parent_root(),
            state_root: self.state_root(),
            body_root,
        }
    }
}

fn read_slot(bytes: &[u8], slot_start: usize) -> Result<Slot, DecodeError> {
    let slot_end = slot_start + <Slot as Decode>::ssz_fixed_len();

    let slot_bytes = bytes
        .get(slot_start..slot_end)
        .ok_or(DecodeError::InvalidByteLength {
            len: bytes.len(),
            expected: slot_end,
        })?;

    Slot::from_ssz_bytes(slot_bytes)
}

#[cfg(test)]
mod tests {
    use ssz_types::VariableList;

    use crate::{
        altair::containers::{BeaconBlock, BeaconBlockBody, SyncAggregate},
        phase0::containers::{
            BeaconBlock as Phase0BeaconBlock, BeaconBlockBody as Phase0BeaconBlockBody, Eth1Data,
        },
        preset::Minimal,
    };

    use super::*;

    fn altair_block(slot: Slot) -> SignedBeaconBlock<Minimal> {
        AltairSignedBeaconBlock {
            message: BeaconBlock {
                slot,
                proposer_index: 3,
                parent_root: H256::repeat_byte(1),
                state_root: H256::repeat_byte(2),
                body: BeaconBlockBody {
                    randao_reveal: SignatureBytes::empty(),
                    eth1_data: Eth1Data::default(),
                    graffiti: H256::ZERO,
                    proposer_slashings: VariableList::empty(),
                    attester_slashings: VariableList::empty(),
                    attestations: VariableList::empty(),
                    deposits: VariableList::empty(),
                    voluntary_exits: VariableList::empty(),
                    sync_aggregate: SyncAggregate::empty(),
                },
            },
            signature: SignatureBytes::empty(),
        }
        .into()
    }

    #[test]
    fn signed_block_is_decoded_with_layout_of_its_slot() -> Result<(), DecodeError> {
        let config = Config::minimal().start_and_stay_in(Phase::Altair);
        let block = altair_block(5);
        let decoded = SignedBeaconBlock::<Minimal>::from_ssz_bytes(&config, &block.to_ssz_bytes())?;

        assert_eq!(decoded, block);
        assert_eq!(decoded.phase(), Phase::Altair);
        assert_eq!(decoded.message_root(), decoded.to_header().tree_hash_root());

        Ok(())
    }

    #[test]
    fn phase0_block_is_decoded_before_altair_fork() -> Result<(), DecodeError> {
        let config = Config::minimal().upgrade_once(Phase::Altair, 2);
        let block = SignedBeaconBlock::<Minimal>::from(Phase0SignedBeaconBlock {
            message: Phase0BeaconBlock {
                slot: 15,
                proposer_index: 1,
                parent_root: H256::repeat_byte(1),
                body: Phase0BeaconBlockBody::default(),
                ..Phase0BeaconBlock::default()
            },
            signature: SignatureBytes::empty(),
        });

        let decoded = SignedBeaconBlock::<Minimal>::from_ssz_bytes(&config, &block.to_ssz_bytes())?;

        assert_eq!(decoded, block);
        assert_eq!(decoded.phase(), Phase::Phase0);

        // The same bytes at an Altair slot lack a sync aggregate.
        let late = SignedBeaconBlock::<Minimal>::from(Phase0SignedBeaconBlock {
            message: Phase0BeaconBlock {
                slot: 16,
                ..Phase0BeaconBlock::default()
            },
            signature: SignatureBytes::empty(),
        });

        let late_bytes = late.to_ssz_bytes();

        assert!(SignedBeaconBlock::<Minimal>::from_ssz_bytes(&config, &late_bytes).is_err());

        Ok(())
    }

    #[test]
    fn decoding_block_in_wrong_phase_fails() {
        // An Altair block placed after the Bellatrix fork is decoded as a Bellatrix block.
        let config = Config::minimal().upgrade_once(Phase::Bellatrix, 1);
        let block = altair_block(9);

        let bytes = block.to_ssz_bytes();

        assert!(SignedBeaconBlock::<Minimal>::from_ssz_bytes(&config, &bytes).is_err());
    }

    #[test]
    fn truncated_input_is_rejected_before_slot() {
        assert_eq!(
            SignedBeaconBlock::<Minimal>::from_ssz_bytes(&Config::minimal(), &[0; 10]),
            Err(DecodeError::InvalidByteLength {
                len: 10,
                expected: 108,
            }),
        );
    }
}
