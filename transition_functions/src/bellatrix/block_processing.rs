use anyhow::{bail, ensure, Result};
use execution_engine::{ExecutionEngine, NewPayloadRequest, PayloadStatus};
use helper_functions::{
    accessors::{get_current_epoch, get_randao_mix},
    block_rewards::RewardLedger,
    misc::compute_timestamp_at_slot,
    verifier::Verifier,
};
use tokio_util::sync::CancellationToken;
use tree_hash::TreeHash as _;
use types::{
    bellatrix::{
        beacon_state::BeaconState as BellatrixBeaconState,
        containers::{
            BeaconBlock as BellatrixBeaconBlock, ExecutionPayload, ExecutionPayloadHeader,
        },
    },
    config::Config,
    phase0::primitives::{ExecutionBlockHash, UnixSeconds, H256},
    preset::Preset,
    traits::PostBellatrixBeaconState,
};

use crate::{
    altair::{self, Operations},
    unphased::{self, Error},
};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "metrics")]
use types::nonstandard::Phase;

pub fn process_block<P: Preset>(
    config: &Config,
    state: &mut BellatrixBeaconState<P>,
    block: &BellatrixBeaconBlock<P>,
    execution_engine: impl ExecutionEngine<P>,
    mut verifier: impl Verifier,
    mut ledger: impl RewardLedger,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.block_transition_timer(Phase::Bellatrix));

    let body = &block.body;

    let header = altair::header_of(
        block.slot,
        block.proposer_index,
        block.parent_root,
        body.tree_hash_root(),
    );

    unphased::process_block_header(state, header)?;

    // > [New in Bellatrix]
    if is_execution_enabled(state, &body.execution_payload) {
        process_execution_payload(config, state, &body.execution_payload, execution_engine)?;
    }

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

    altair::process_sync_aggregate(
        config,
        state,
        &body.sync_aggregate,
        &mut verifier,
        ledger,
    )?;

    verifier.finish()
}

// Execution stays disabled until the first non-empty payload is included.
#[must_use]
pub fn is_execution_enabled<P: Preset>(
    state: &impl PostBellatrixBeaconState<P>,
    payload: &ExecutionPayload<P>,
) -> bool {
    state.is_merge_transition_complete() || *payload != ExecutionPayload::default()
}

pub fn process_execution_payload<P: Preset>(
    config: &Config,
    state: &mut BellatrixBeaconState<P>,
    payload: &ExecutionPayload<P>,
    execution_engine: impl ExecutionEngine<P>,
) -> Result<()> {
    let expected_parent_hash = state
        .is_merge_transition_complete()
        .then(|| state.latest_execution_block_hash());

    validate_payload_consistency(
        config,
        state,
        PayloadSummary {
            parent_hash: payload.parent_hash,
            prev_randao: payload.prev_randao,
            timestamp: payload.timestamp,
        },
        expected_parent_hash,
    )?;

    // > Verify the execution payload is valid
    verify_with_engine(execution_engine, NewPayloadRequest::Bellatrix { payload })?;

    // > Cache execution payload header
    state.latest_execution_payload_header = ExecutionPayloadHeader::from(payload);

    Ok(())
}

/// Fields checked against the state in every phase with execution payloads.
#[derive(Clone, Copy)]
pub struct PayloadSummary {
    pub parent_hash: ExecutionBlockHash,
    pub prev_randao: H256,
    pub timestamp: UnixSeconds,
}

/// Checks a payload against the state.
///
/// `expected_parent_hash` is `None` while the parent hash is not constrained, which is only the
/// case for the payload that completes the merge.
pub fn validate_payload_consistency<P: Preset>(
    config: &Config,
    state: &impl PostBellatrixBeaconState<P>,
    summary: PayloadSummary,
    expected_parent_hash: Option<ExecutionBlockHash>,
) -> Result<()> {
    // > Verify consistency of the parent hash with respect to the previous execution payload header
    if let Some(in_state) = expected_parent_hash {
        let in_block = summary.parent_hash;

        ensure!(
            in_state == in_block,
            Error::ExecutionPayloadParentHashMismatch { in_state, in_block },
        );
    }

    // > Verify prev_randao
    let in_state = get_randao_mix(state, get_current_epoch(state));
    let in_block = summary.prev_randao;

    ensure!(
        in_state == in_block,
        Error::ExecutionPayloadPrevRandaoMismatch { in_state, in_block },
    );

    // > Verify timestamp
    let computed = compute_timestamp_at_slot(config, state, state.slot());
    let in_block = summary.timestamp;

    ensure!(
        computed == in_block,
        Error::ExecutionPayloadTimestampMismatch { computed, in_block },
    );

    Ok(())
}

/// Asks the engine for a verdict.
///
/// A payload judged invalid makes the block invalid. An engine that could not judge the payload
/// fails with [`execution_engine::Error`], which callers treat as a collaborator failure.
pub fn verify_with_engine<P: Preset>(
    execution_engine: impl ExecutionEngine<P>,
    request: NewPayloadRequest<P>,
) -> Result<()> {
    match execution_engine.verify_and_notify_new_payload(request)? {
        PayloadStatus::Valid => Ok(()),
        PayloadStatus::Invalid(check) => bail!(Error::ExecutionPayloadInvalid { check }),
    }
}

#[cfg(test)]
mod tests {
    use core::num::NonZeroU64;

    use execution_engine::{MockExecutionEngine, NullExecutionEngine, PayloadCheck, Verdict};
    use test_case::test_case;
    use types::{nonstandard::Phase, preset::Minimal};

    use super::*;

    fn genesis_state() -> Result<BellatrixBeaconState<Minimal>> {
        let config = Config::minimal();
        let count = NonZeroU64::new(16).ok_or_else(|| anyhow::anyhow!("zero"))?;

        interop::quick_start_beacon_state(&config, Phase::Bellatrix, 1000, count)?
            .bellatrix()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("quick start did not produce a Bellatrix state"))
    }

    fn valid_payload(
        config: &Config,
        state: &BellatrixBeaconState<Minimal>,
    ) -> ExecutionPayload<Minimal> {
        ExecutionPayload {
            prev_randao: get_randao_mix(state, get_current_epoch(state)),
            timestamp: compute_timestamp_at_slot(config, state, state.slot),
            block_hash: H256::repeat_byte(1),
            ..ExecutionPayload::default()
        }
    }

    #[test]
    fn first_payload_completes_merge_and_constrains_next_parent() -> Result<()> {
        let config = Config::minimal();
        let mut state = genesis_state()?;
        let payload = valid_payload(&config, &state);

        assert!(!state.is_merge_transition_complete());
        assert!(!is_execution_enabled(&state, &ExecutionPayload::default()));
        assert!(is_execution_enabled(&state, &payload));

        process_execution_payload(&config, &mut state, &payload, NullExecutionEngine)?;

        assert!(state.is_merge_transition_complete());
        assert_eq!(state.latest_execution_block_hash(), payload.block_hash);

        let orphan = ExecutionPayload {
            parent_hash: H256::repeat_byte(9),
            ..valid_payload(&config, &state)
        };

        let error = process_execution_payload(&config, &mut state, &orphan, NullExecutionEngine)
            .expect_err("parent hash does not extend the cached header")
            .downcast::<Error>()?;

        assert!(matches!(error, Error::ExecutionPayloadParentHashMismatch { .. }));

        Ok(())
    }

    #[test_case(
        |payload| payload.prev_randao = H256::repeat_byte(3)
        => matches Error::ExecutionPayloadPrevRandaoMismatch { .. };
        "wrong prev_randao"
    )]
    #[test_case(
        |payload| payload.timestamp += 1
        => matches Error::ExecutionPayloadTimestampMismatch { .. };
        "wrong timestamp"
    )]
    fn inconsistent_payload_is_rejected(modify: fn(&mut ExecutionPayload<Minimal>)) -> Error {
        let config = Config::minimal();
        let mut state = genesis_state().expect("quick start state can be built");
        let mut payload = valid_payload(&config, &state);

        modify(&mut payload);

        process_execution_payload(&config, &mut state, &payload, NullExecutionEngine)
            .expect_err("payload is inconsistent with state")
            .downcast()
            .expect("error should come from block processing")
    }

    #[test]
    fn engine_verdicts_are_told_apart() -> Result<()> {
        let config = Config::minimal();
        let state = genesis_state()?;
        let payload = valid_payload(&config, &state);

        let invalid = MockExecutionEngine::default()
            .with_verdict(PayloadCheck::VersionedHashes, Verdict::Invalid);

        let error = process_execution_payload(&config, &mut state.clone(), &payload, &invalid)
            .expect_err("engine judged the payload invalid")
            .downcast::<Error>()?;

        assert_eq!(
            error,
            Error::ExecutionPayloadInvalid {
                check: PayloadCheck::VersionedHashes,
            },
        );

        let unavailable = MockExecutionEngine::new(Verdict::Unavailable);

        let error = process_execution_payload(&config, &mut state.clone(), &payload, &unavailable)
            .expect_err("engine could not judge the payload")
            .downcast::<execution_engine::Error>()?;

        assert_eq!(
            error,
            execution_engine::Error::Unavailable {
                check: PayloadCheck::BlockHash,
            },
        );

        assert_eq!(unavailable.calls(PayloadCheck::Execution), 0);

        Ok(())
    }
}
