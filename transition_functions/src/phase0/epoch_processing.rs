use anyhow::Result;
use helper_functions::accessors::{get_current_epoch, total_active_balance};
use log::debug;
use tokio_util::sync::CancellationToken;
use types::{
    config::Config, phase0::beacon_state::BeaconState as Phase0BeaconState, preset::Preset,
};

use super::epoch_intermediates::{self, Performance, Statistics, ValidatorSummary};
use crate::unphased;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "metrics")]
use types::nonstandard::Phase;

pub fn process_epoch<P: Preset>(
    config: &Config,
    state: &mut Phase0BeaconState<P>,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.epoch_processing_timer(Phase::Phase0));

    debug!("processing Phase 0 epoch {}", get_current_epoch(state));

    let (statistics, summaries, performance) = epoch_intermediates::statistics(state)?;

    process_justification_and_finalization(state, statistics)?;
    process_rewards_and_penalties(state, statistics, summaries, performance, cancel)?;

    unphased::process_registry_updates(config, state)?;
    unphased::process_slashings(state, P::PROPORTIONAL_SLASHING_MULTIPLIER, cancel)?;
    unphased::process_eth1_data_reset(state);
    unphased::process_effective_balance_updates(state, |_| P::MAX_EFFECTIVE_BALANCE, cancel)?;
    unphased::process_slashings_reset(state);
    unphased::process_randao_mixes_reset(state);
    unphased::process_historical_roots_update(state)?;
    process_participation_record_updates(state);

    Ok(())
}

pub fn process_justification_and_finalization<P: Preset>(
    state: &mut Phase0BeaconState<P>,
    statistics: Statistics,
) -> Result<()> {
    if !unphased::should_process_justification_and_finalization(state) {
        return Ok(());
    }

    unphased::weigh_justification_and_finalization(
        state,
        total_active_balance(state)?.get(),
        statistics.previous_epoch_target_attesting_balance,
        statistics.current_epoch_target_attesting_balance,
    )
}

/// Must run after justification. The inactivity leak depends on the finalized checkpoint.
pub fn process_rewards_and_penalties<P: Preset>(
    state: &mut Phase0BeaconState<P>,
    statistics: Statistics,
    summaries: Vec<ValidatorSummary>,
    performance: Vec<Performance>,
    cancel: &CancellationToken,
) -> Result<()> {
    if !unphased::should_process_rewards_and_penalties(state) {
        return Ok(());
    }

    let deltas = epoch_intermediates::epoch_deltas(state, statistics, summaries, performance)?;

    unphased::process_rewards_and_penalties(state, deltas, cancel)
}

pub fn process_participation_record_updates<P: Preset>(state: &mut Phase0BeaconState<P>) {
    // > Rotate current/previous epoch attestations
    state.previous_epoch_attestations = core::mem::take(&mut state.current_epoch_attestations);
}
