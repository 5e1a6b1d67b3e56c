use anyhow::{ensure, Result};
use execution_engine::{ExecutionEngine, NewPayloadRequest};
use helper_functions::{
    block_rewards::RewardLedger, misc::kzg_commitment_to_versioned_hash, verifier::Verifier,
};
use tokio_util::sync::CancellationToken;
use tree_hash::TreeHash as _;
use types::{
    config::Config,
    deneb::{
        beacon_state::BeaconState as DenebBeaconState,
        containers::{BeaconBlock as DenebBeaconBlock, ExecutionPayload, ExecutionPayloadHeader},
        primitives::{KzgCommitment, VersionedHash},
    },
    nonstandard::Phase,
    phase0::primitives::H256,
    preset::Preset,
};

use crate::{
    altair::{self, Operations},
    bellatrix::{self, PayloadSummary},
    capella,
    unphased::{self, cancellation, Error},
};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

pub fn process_block<P: Preset>(
    config: &Config,
    state: &mut DenebBeaconState<P>,
    block: &DenebBeaconBlock<P>,
    execution_engine: impl ExecutionEngine<P>,
    mut verifier: impl Verifier,
    mut ledger: impl RewardLedger,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.block_transition_timer(Phase::Deneb));

    let body = &block.body;

    let header = altair::header_of(
        block.slot,
        block.proposer_index,
        block.parent_root,
        body.tree_hash_root(),
    );

    unphased::process_block_header(state, header)?;
    capella::process_withdrawals(state, &body.execution_payload.withdrawals)?;

    // > [Modified in Deneb:EIP4844]
    process_execution_payload(
        config,
        state,
        &body.execution_payload,
        &body.blob_kzg_commitments,
        block.parent_root,
        execution_engine,
        cancel,
    )?;

    unphased::process_randao(config, state, &body.randao_reveal, &mut verifier)?;
    unphased::process_eth1_data(state, body.eth1_data)?;

    let eth1_deposit_bound = state.eth1_data.deposit_count;

    unphased::validate_deposit_count(state, body.deposits.len(), eth1_deposit_bound)?;

    altair::process_operations(
        config,
        state,
        Operations {
            proposer_slashings: &body.proposer_slashings,
            attester_slashings: &body.attester_slashings,
            attestations: &body.attestations,
            deposits: &body.deposits,
            voluntary_exits: &body.voluntary_exits,
        },
        &mut verifier,
        &mut ledger,
        cancel,
    )?;

    capella::process_bls_to_execution_changes(
        config,
        state,
        &body.bls_to_execution_changes,
        &mut verifier,
        cancel,
    )?;

    altair::process_sync_aggregate(
        config,
        state,
        &body.sync_aggregate,
        &mut verifier,
        ledger,
    )?;

    verifier.finish()
}

pub fn process_execution_payload<P: Preset>(
    config: &Config,
    state: &mut DenebBeaconState<P>,
    payload: &ExecutionPayload<P>,
    blob_kzg_commitments: &[KzgCommitment],
    parent_beacon_block_root: H256,
    execution_engine: impl ExecutionEngine<P>,
    cancel: &CancellationToken,
) -> Result<()> {
    bellatrix::validate_payload_consistency(
        config,
        state,
        PayloadSummary {
            parent_hash: payload.parent_hash,
            prev_randao: payload.prev_randao,
            timestamp: payload.timestamp,
        },
        Some(state.latest_execution_payload_header.block_hash),
    )?;

    let versioned_hashes =
        blob_versioned_hashes(config, Phase::Deneb, blob_kzg_commitments, cancel)?;

    // > Verify the execution payload is valid
    bellatrix::verify_with_engine(
        execution_engine,
        NewPayloadRequest::Deneb {
            payload,
            versioned_hashes: &versioned_hashes,
            parent_beacon_block_root,
        },
    )?;

    // > Cache execution payload header
    state.latest_execution_payload_header = ExecutionPayloadHeader::from(payload);

    Ok(())
}

/// Checks the per-block blob limit of `phase` and hashes every commitment.
pub fn blob_versioned_hashes(
    config: &Config,
    phase: Phase,
    blob_kzg_commitments: &[KzgCommitment],
    cancel: &CancellationToken,
) -> Result<Vec<VersionedHash>> {
    // > Verify commitments are under limit
    let maximum = config.max_blobs_per_block(phase);
    let in_block = blob_kzg_commitments.len() as u64;

    ensure!(
        in_block <= maximum,
        Error::TooManyBlockKzgCommitments { maximum, in_block },
    );

    blob_kzg_commitments
        .iter()
        .map(|commitment| {
            cancellation::check(cancel)?;
            Ok(kzg_commitment_to_versioned_hash(commitment))
        })
        .collect()
}
