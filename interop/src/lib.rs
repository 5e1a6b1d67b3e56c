use core::num::NonZeroU64;
use std::sync::Arc;

use alloy_primitives::U256;
use anyhow::Result;
use bls::SecretKey;
use helper_functions::{fork, misc, signing::SignForAllForks as _};
use hex_literal::hex;
use ssz_types::{FixedVector, VariableList};
use tree_hash::TreeHash as _;
use types::{
    altair::containers::BeaconBlockBody as AltairBeaconBlockBody,
    bellatrix::{
        beacon_state::BeaconState as BellatrixBeaconState,
        containers::BeaconBlockBody as BellatrixBeaconBlockBody,
    },
    capella::{
        beacon_state::BeaconState as CapellaBeaconState,
        containers::BeaconBlockBody as CapellaBeaconBlockBody,
    },
    combined::BeaconState as CombinedBeaconState,
    config::Config,
    deneb::{
        beacon_state::BeaconState as DenebBeaconState,
        containers::BeaconBlockBody as DenebBeaconBlockBody,
    },
    electra::{
        beacon_state::BeaconState as ElectraBeaconState,
        consts::UNSET_DEPOSIT_REQUESTS_START_INDEX,
        containers::BeaconBlockBody as ElectraBeaconBlockBody,
    },
    nonstandard::Phase,
    phase0::{
        beacon_state::BeaconState as Phase0BeaconState,
        consts::FAR_FUTURE_EPOCH,
        containers::{
            BeaconBlockBody as Phase0BeaconBlockBody, BeaconBlockHeader, DepositData,
            DepositMessage, Eth1Data, Fork, Validator,
        },
        primitives::{UnixSeconds, ValidatorIndex, Version, H256},
    },
    preset::Preset,
};

/// <https://github.com/ethereum/eth2.0-pm/tree/b7c76e7a9d036ce73ca6aa0b7065db92f7728f41/interop/mocked_start#create-genesis-state>
const QUICK_START_ETH1_BLOCK_HASH: H256 = H256::repeat_byte(0x42);

/// <https://github.com/ethereum/eth2.0-pm/tree/b7c76e7a9d036ce73ca6aa0b7065db92f7728f41/interop/mocked_start#pubkeyprivkey-generation>
const CURVE_ORDER: [u8; 32] =
    hex!("73eda753299d7d483339d80809a1d80553bda402fffe5bfeffffffff00000001");

/// Genesis state in `phase` with `validator_count` active validators at maximum effective balance.
///
/// Deposits are not replayed. The registry is filled in directly, as if every quick start deposit
/// had been processed, so `eth1_data.deposit_root` is left zeroed.
pub fn quick_start_beacon_state<P: Preset>(
    config: &Config,
    phase: Phase,
    genesis_time: UnixSeconds,
    validator_count: NonZeroU64,
) -> Result<CombinedBeaconState<P>> {
    let validators = (0..validator_count.get())
        .map(|index| {
            let pubkey = secret_key(index).to_public_key().to_bytes();

            Validator {
                withdrawal_credentials: misc::bls_withdrawal_credentials(&pubkey),
                pubkey,
                effective_balance: P::MAX_EFFECTIVE_BALANCE,
                slashed: false,
                activation_eligibility_epoch: 0,
                activation_epoch: 0,
                exit_epoch: FAR_FUTURE_EPOCH,
                withdrawable_epoch: FAR_FUTURE_EPOCH,
            }
        })
        .collect::<Vec<_>>();

    let count = validators.len();
    let validators = VariableList::from(validators);
    let version = config.fork_version(phase);

    let state = Phase0BeaconState {
        genesis_time,
        genesis_validators_root: validators.tree_hash_root(),
        fork: Fork {
            previous_version: version,
            current_version: version,
            epoch: 0,
        },
        eth1_data: Eth1Data {
            deposit_root: H256::ZERO,
            deposit_count: validator_count.get(),
            block_hash: QUICK_START_ETH1_BLOCK_HASH,
        },
        eth1_deposit_index: validator_count.get(),
        validators: Arc::new(validators),
        balances: Arc::new(VariableList::from(vec![P::MAX_EFFECTIVE_BALANCE; count])),
        randao_mixes: Arc::new(FixedVector::from_elem(QUICK_START_ETH1_BLOCK_HASH)),
        ..Phase0BeaconState::default()
    };

    let (mut state, body_root): (CombinedBeaconState<P>, H256) = match phase {
        Phase::Phase0 => (
            state.into(),
            Phase0BeaconBlockBody::<P>::default().tree_hash_root(),
        ),
        Phase::Altair => (
            fork::upgrade_to_altair(config, state)?.into(),
            AltairBeaconBlockBody::<P>::default().tree_hash_root(),
        ),
        Phase::Bellatrix => (
            upgrade_to_bellatrix(config, state)?.into(),
            BellatrixBeaconBlockBody::<P>::default().tree_hash_root(),
        ),
        Phase::Capella => (
            upgrade_to_capella(config, state)?.into(),
            CapellaBeaconBlockBody::<P>::default().tree_hash_root(),
        ),
        Phase::Deneb => (
            upgrade_to_deneb(config, state)?.into(),
            DenebBeaconBlockBody::<P>::default().tree_hash_root(),
        ),
        Phase::Electra => (
            electra_genesis(upgrade_to_deneb(config, state)?).into(),
            ElectraBeaconBlockBody::<P>::default().tree_hash_root(),
        ),
    };

    restamp(&mut state, version, body_root);

    Ok(state)
}

/// <https://github.com/ethereum/eth2.0-pm/tree/b7c76e7a9d036ce73ca6aa0b7065db92f7728f41/interop/mocked_start#pubkeyprivkey-generation>
#[must_use]
pub fn secret_key(validator_index: ValidatorIndex) -> SecretKey {
    let index_hash = hashing::hash(validator_index.tree_hash_root());
    let curve_order = U256::from_be_bytes(CURVE_ORDER);
    let scalar = U256::from_le_bytes(index_hash.0) % curve_order;

    // The reduced hash is below the curve order. It is only zero for a preimage of a multiple of
    // the order, which the interop vectors do not contain.
    SecretKey::from_bytes(&scalar.to_be_bytes::<32>())
        .unwrap_or_else(|_| unreachable!("interop secret keys are nonzero and below curve order"))
}

/// <https://github.com/ethereum/eth2.0-pm/tree/b7c76e7a9d036ce73ca6aa0b7065db92f7728f41/interop/mocked_start#generate-deposits>
#[must_use]
pub fn quick_start_deposit_data<P: Preset>(config: &Config, secret_key: &SecretKey) -> DepositData {
    let pubkey = secret_key.to_public_key().to_bytes();
    let withdrawal_credentials = misc::bls_withdrawal_credentials(&pubkey);
    let amount = P::MAX_EFFECTIVE_BALANCE;

    let deposit_message = DepositMessage {
        pubkey: pubkey.clone(),
        withdrawal_credentials,
        amount,
    };

    let signature = deposit_message.sign(config, secret_key).to_bytes();

    DepositData {
        pubkey,
        withdrawal_credentials,
        amount,
        signature,
    }
}

fn upgrade_to_bellatrix<P: Preset>(
    config: &Config,
    state: Phase0BeaconState<P>,
) -> Result<BellatrixBeaconState<P>> {
    let state = fork::upgrade_to_altair(config, state)?;
    Ok(fork::upgrade_to_bellatrix(config, state))
}

fn upgrade_to_capella<P: Preset>(
    config: &Config,
    state: Phase0BeaconState<P>,
) -> Result<CapellaBeaconState<P>> {
    let state = upgrade_to_bellatrix(config, state)?;
    Ok(fork::upgrade_to_capella(config, state))
}

fn upgrade_to_deneb<P: Preset>(
    config: &Config,
    state: Phase0BeaconState<P>,
) -> Result<DenebBeaconState<P>> {
    let state = upgrade_to_capella(config, state)?;
    Ok(fork::upgrade_to_deneb(config, state))
}

// There is no upgrade into Electra. Genesis states are built field by field instead.
fn electra_genesis<P: Preset>(pre: DenebBeaconState<P>) -> ElectraBeaconState<P> {
    let header = pre.latest_execution_payload_header;

    ElectraBeaconState {
        genesis_time: pre.genesis_time,
        genesis_validators_root: pre.genesis_validators_root,
        slot: pre.slot,
        fork: pre.fork,
        latest_block_header: pre.latest_block_header,
        block_roots: pre.block_roots,
        state_roots: pre.state_roots,
        historical_roots: pre.historical_roots,
        eth1_data: pre.eth1_data,
        eth1_data_votes: pre.eth1_data_votes,
        eth1_deposit_index: pre.eth1_deposit_index,
        validators: pre.validators,
        balances: pre.balances,
        randao_mixes: pre.randao_mixes,
        slashings: pre.slashings,
        previous_epoch_participation: pre.previous_epoch_participation,
        current_epoch_participation: pre.current_epoch_participation,
        justification_bits: pre.justification_bits,
        previous_justified_checkpoint: pre.previous_justified_checkpoint,
        current_justified_checkpoint: pre.current_justified_checkpoint,
        finalized_checkpoint: pre.finalized_checkpoint,
        inactivity_scores: pre.inactivity_scores,
        current_sync_committee: pre.current_sync_committee,
        next_sync_committee: pre.next_sync_committee,
        latest_execution_payload_header: header,
        next_withdrawal_index: pre.next_withdrawal_index,
        next_withdrawal_validator_index: pre.next_withdrawal_validator_index,
        historical_summaries: pre.historical_summaries,
        deposit_requests_start_index: UNSET_DEPOSIT_REQUESTS_START_INDEX,
        deposit_balance_to_consume: 0,
        exit_balance_to_consume: 0,
        earliest_exit_epoch: 0,
        consolidation_balance_to_consume: 0,
        earliest_consolidation_epoch: 0,
        pending_deposits: Arc::default(),
        pending_partial_withdrawals: Arc::default(),
        pending_consolidations: Arc::default(),
        cache: pre.cache,
    }
}

// Upgrades record the previous version. A genesis state has only one.
fn restamp<P: Preset>(state: &mut CombinedBeaconState<P>, version: Version, body_root: H256) {
    let fork = Fork {
        previous_version: version,
        current_version: version,
        epoch: 0,
    };

    let latest_block_header = BeaconBlockHeader {
        body_root,
        ..BeaconBlockHeader::default()
    };

    match state {
        CombinedBeaconState::Phase0(state) => {
            let state = Arc::make_mut(state);
            state.fork = fork;
            state.latest_block_header = latest_block_header;
        }
        CombinedBeaconState::Altair(state) => {
            let state = Arc::make_mut(state);
            state.fork = fork;
            state.latest_block_header = latest_block_header;
        }
        CombinedBeaconState::Bellatrix(state) => {
            let state = Arc::make_mut(state);
            state.fork = fork;
            state.latest_block_header = latest_block_header;
        }
        CombinedBeaconState::Capella(state) => {
            let state = Arc::make_mut(state);
            state.fork = fork;
            state.latest_block_header = latest_block_header;
        }
        CombinedBeaconState::Deneb(state) => {
            let state = Arc::make_mut(state);
            state.fork = fork;
            state.latest_block_header = latest_block_header;
        }
        CombinedBeaconState::Electra(state) => {
            let state = Arc::make_mut(state);
            state.fork = fork;
            state.latest_block_header = latest_block_header;
        }
    }
}
