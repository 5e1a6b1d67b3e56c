use anyhow::Result;
use bls::{PublicKey, SecretKey, Signature, SignatureBytes};
use derive_more::From;
use tree_hash::{PackedEncoding, TreeHash, TreeHashType};
use types::{
    altair::{consts::DOMAIN_SYNC_COMMITTEE, containers::BeaconBlock as AltairBeaconBlock},
    bellatrix::containers::BeaconBlock as BellatrixBeaconBlock,
    capella::{
        consts::DOMAIN_BLS_TO_EXECUTION_CHANGE,
        containers::{BeaconBlock as CapellaBeaconBlock, BlsToExecutionChange},
    },
    config::Config,
    deneb::containers::BeaconBlock as DenebBeaconBlock,
    electra::containers::BeaconBlock as ElectraBeaconBlock,
    nonstandard::Phase,
    phase0::{
        consts::{
            DOMAIN_BEACON_ATTESTER, DOMAIN_BEACON_PROPOSER, DOMAIN_DEPOSIT, DOMAIN_RANDAO,
            DOMAIN_VOLUNTARY_EXIT,
        },
        containers::{AttestationData, BeaconBlockHeader, DepositMessage, VoluntaryExit},
        primitives::{DomainType, Epoch, Slot, H256},
    },
    preset::Preset,
    traits::BeaconState,
};

use crate::{
    accessors,
    error::SignatureKind,
    misc,
    verifier::{SingleVerifier, Verifier as _},
};

// `Epoch` and `Slot` are the same type, so the RANDAO reveal needs a wrapper of its own.
#[derive(Clone, Copy, From)]
pub struct RandaoEpoch(Epoch);

impl TreeHash for RandaoEpoch {
    fn tree_hash_type() -> TreeHashType {
        Epoch::tree_hash_type()
    }

    fn tree_hash_packed_encoding(&self) -> PackedEncoding {
        self.0.tree_hash_packed_encoding()
    }

    fn tree_hash_packing_factor() -> usize {
        Epoch::tree_hash_packing_factor()
    }

    fn tree_hash_root(&self) -> H256 {
        self.0.tree_hash_root()
    }
}

/// Messages signed over the genesis fork version and a zero genesis root.
pub trait SignForAllForks: TreeHash {
    const DOMAIN_TYPE: DomainType;
    const SIGNATURE_KIND: SignatureKind;

    fn signing_root(&self, config: &Config) -> H256 {
        let domain = misc::compute_domain(config, Self::DOMAIN_TYPE, None, None);
        misc::compute_signing_root(self, domain)
    }

    fn sign(&self, config: &Config, secret_key: &SecretKey) -> Signature {
        secret_key.sign(self.signing_root(config))
    }

    fn verify(
        &self,
        config: &Config,
        signature_bytes: &SignatureBytes,
        public_key: &PublicKey,
    ) -> Result<()> {
        SingleVerifier.verify_singular(
            self.signing_root(config),
            signature_bytes,
            public_key,
            Self::SIGNATURE_KIND,
        )
    }
}

/// Messages signed over the genesis fork version and the chain's genesis validators root.
pub trait SignForAllForksWithGenesis<P: Preset>: TreeHash {
    const DOMAIN_TYPE: DomainType;
    const SIGNATURE_KIND: SignatureKind;

    fn signing_root(&self, config: &Config, beacon_state: &(impl BeaconState<P> + ?Sized)) -> H256 {
        let genesis_validators_root = Some(beacon_state.genesis_validators_root());
        let domain = misc::compute_domain(config, Self::DOMAIN_TYPE, None, genesis_validators_root);
        misc::compute_signing_root(self, domain)
    }

    fn sign(
        &self,
        config: &Config,
        beacon_state: &(impl BeaconState<P> + ?Sized),
        secret_key: &SecretKey,
    ) -> Signature {
        secret_key.sign(self.signing_root(config, beacon_state))
    }
}

/// Messages signed over the fork version in effect at the epoch they refer to.
pub trait SignForSingleFork<P: Preset>: TreeHash {
    const DOMAIN_TYPE: DomainType;
    const SIGNATURE_KIND: SignatureKind;

    fn epoch(&self) -> Epoch;

    fn signing_root(&self, config: &Config, beacon_state: &(impl BeaconState<P> + ?Sized)) -> H256 {
        let epoch = Some(self.epoch());
        let domain = accessors::get_domain(config, beacon_state, Self::DOMAIN_TYPE, epoch);
        misc::compute_signing_root(self, domain)
    }

    fn sign(
        &self,
        config: &Config,
        beacon_state: &(impl BeaconState<P> + ?Sized),
        secret_key: &SecretKey,
    ) -> Signature {
        secret_key.sign(self.signing_root(config, beacon_state))
    }
}

pub trait SignForSingleForkAtSlot<P: Preset>: TreeHash {
    const DOMAIN_TYPE: DomainType;
    const SIGNATURE_KIND: SignatureKind;

    fn signing_root(
        &self,
        config: &Config,
        beacon_state: &(impl BeaconState<P> + ?Sized),
        slot: Slot,
    ) -> H256 {
        let epoch = misc::compute_epoch_at_slot::<P>(slot);
        let domain = accessors::get_domain(config, beacon_state, Self::DOMAIN_TYPE, Some(epoch));
        misc::compute_signing_root(self, domain)
    }

    fn sign(
        &self,
        config: &Config,
        beacon_state: &(impl BeaconState<P> + ?Sized),
        slot: Slot,
        secret_key: &SecretKey,
    ) -> Signature {
        secret_key.sign(self.signing_root(config, beacon_state, slot))
    }
}

impl SignForAllForks for DepositMessage {
    const DOMAIN_TYPE: DomainType = DOMAIN_DEPOSIT;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Deposit;
}

impl<P: Preset> SignForAllForksWithGenesis<P> for BlsToExecutionChange {
    const DOMAIN_TYPE: DomainType = DOMAIN_BLS_TO_EXECUTION_CHANGE;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::BlsToExecutionChange;
}

impl<P: Preset> SignForSingleFork<P> for AttestationData {
    const DOMAIN_TYPE: DomainType = DOMAIN_BEACON_ATTESTER;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Attestation;

    fn epoch(&self) -> Epoch {
        self.target.epoch
    }
}

// A header has the same hash tree root as the block it summarizes,
// so blocks of every phase can be verified through their headers.
impl<P: Preset> SignForSingleFork<P> for BeaconBlockHeader {
    const DOMAIN_TYPE: DomainType = DOMAIN_BEACON_PROPOSER;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Block;

    fn epoch(&self) -> Epoch {
        misc::compute_epoch_at_slot::<P>(self.slot)
    }
}

#[duplicate::duplicate_item(
    block_type;
    [AltairBeaconBlock];
    [BellatrixBeaconBlock];
    [CapellaBeaconBlock];
    [DenebBeaconBlock];
    [ElectraBeaconBlock];
)]
impl<P: Preset> SignForSingleFork<P> for block_type<P> {
    const DOMAIN_TYPE: DomainType = DOMAIN_BEACON_PROPOSER;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Block;

    fn epoch(&self) -> Epoch {
        misc::compute_epoch_at_slot::<P>(self.slot)
    }
}

impl<P: Preset> SignForSingleFork<P> for RandaoEpoch {
    const DOMAIN_TYPE: DomainType = DOMAIN_RANDAO;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::Randao;

    fn epoch(&self) -> Epoch {
        self.0
    }
}

impl<P: Preset> SignForSingleFork<P> for VoluntaryExit {
    const DOMAIN_TYPE: DomainType = DOMAIN_VOLUNTARY_EXIT;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::VoluntaryExit;

    fn epoch(&self) -> Epoch {
        self.epoch
    }

    // Starting with Deneb, exits are signed over the Capella fork version so that they never
    // expire.
    fn signing_root(&self, config: &Config, beacon_state: &(impl BeaconState<P> + ?Sized)) -> H256 {
        let domain_type = <Self as SignForSingleFork<P>>::DOMAIN_TYPE;

        let domain = if beacon_state.phase() >= Phase::Deneb {
            let fork_version = Some(config.capella_fork_version);
            let genesis_validators_root = Some(beacon_state.genesis_validators_root());
            misc::compute_domain(config, domain_type, fork_version, genesis_validators_root)
        } else {
            let epoch = <Self as SignForSingleFork<P>>::epoch(self);
            accessors::get_domain(config, beacon_state, domain_type, Some(epoch))
        };

        misc::compute_signing_root(self, domain)
    }
}

// Sync committee members sign the block root of the previous slot.
impl<P: Preset> SignForSingleForkAtSlot<P> for H256 {
    const DOMAIN_TYPE: DomainType = DOMAIN_SYNC_COMMITTEE;
    const SIGNATURE_KIND: SignatureKind = SignatureKind::SyncAggregate;
}

#[cfg(test)]
mod tests {
    use types::{
        capella::beacon_state::BeaconState as CapellaBeaconState,
        deneb::beacon_state::BeaconState as DenebBeaconState,
        phase0::containers::Fork,
        preset::Minimal,
    };

    use super::*;

    fn secret_key() -> SecretKey {
        SecretKey::from_ikm(&[9; 32]).expect("32 bytes of keying material are enough")
    }

    #[test]
    fn deposit_message_signature_verifies() -> Result<()> {
        let config = Config::minimal();
        let secret_key = secret_key();
        let public_key = secret_key.to_public_key();

        let message = DepositMessage {
            pubkey: public_key.to_bytes(),
            withdrawal_credentials: H256::repeat_byte(1),
            amount: Minimal::MAX_EFFECTIVE_BALANCE,
        };

        let signature = message.sign(&config, &secret_key).to_bytes();

        message.verify(&config, &signature, &public_key)
    }

    #[test]
    fn block_header_and_block_share_signing_root() {
        let config = Config::minimal();
        let state = CapellaBeaconState::<Minimal>::default();
        let block = CapellaBeaconBlock::<Minimal> {
            slot: 3,
            proposer_index: 1,
            ..CapellaBeaconBlock::default()
        };

        let header = BeaconBlockHeader {
            slot: block.slot,
            proposer_index: block.proposer_index,
            parent_root: block.parent_root,
            state_root: block.state_root,
            body_root: block.body.tree_hash_root(),
        };

        assert_eq!(
            SignForSingleFork::<Minimal>::signing_root(&block, &config, &state),
            SignForSingleFork::<Minimal>::signing_root(&header, &config, &state),
        );
    }

    #[test]
    fn voluntary_exits_are_pinned_to_capella_from_deneb() {
        let config = Config::minimal();
        let exit = VoluntaryExit {
            epoch: 0,
            validator_index: 0,
        };

        let capella_state = CapellaBeaconState::<Minimal> {
            fork: Fork {
                previous_version: config.bellatrix_fork_version,
                current_version: config.capella_fork_version,
                epoch: 0,
            },
            ..CapellaBeaconState::default()
        };

        let deneb_state = DenebBeaconState::<Minimal> {
            fork: Fork {
                previous_version: config.capella_fork_version,
                current_version: config.deneb_fork_version,
                epoch: 0,
            },
            ..DenebBeaconState::default()
        };

        assert_eq!(
            SignForSingleFork::<Minimal>::signing_root(&exit, &config, &capella_state),
            SignForSingleFork::<Minimal>::signing_root(&exit, &config, &deneb_state),
        );
    }

    #[test]
    fn randao_epoch_hashes_like_an_integer() {
        assert_eq!(RandaoEpoch::from(5).tree_hash_root(), 5_u64.tree_hash_root());
    }
}
