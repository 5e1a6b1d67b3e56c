use anyhow::Result;
use helper_functions::{
    accessors::{get_current_epoch, get_next_epoch},
    error::Error as HelperError,
};
use log::debug;
use tokio_util::sync::CancellationToken;
use tree_hash::TreeHash as _;
use types::{
    capella::containers::HistoricalSummary, config::Config, preset::Preset,
    traits::PostCapellaBeaconState,
};

use crate::{altair, unphased};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Epoch processing for Capella and Deneb.
///
/// Deneb only changes the activation churn limit, which is handled by the accessor.
pub fn process_epoch<P: Preset>(
    config: &Config,
    state: &mut impl PostCapellaBeaconState<P>,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.epoch_processing_timer(state.phase()));

    debug!(
        "processing {} epoch {}",
        state.phase(),
        get_current_epoch(state),
    );

    let (statistics, summaries) = altair::statistics(state);

    altair::process_justification_and_finalization(state, statistics)?;
    altair::process_inactivity_updates(config, state, summaries.iter().copied(), cancel)?;

    altair::process_rewards_and_penalties(
        config,
        state,
        statistics,
        summaries,
        P::INACTIVITY_PENALTY_QUOTIENT_BELLATRIX,
        cancel,
    )?;

    unphased::process_registry_updates(config, state)?;
    unphased::process_slashings(state, P::PROPORTIONAL_SLASHING_MULTIPLIER_BELLATRIX, cancel)?;
    unphased::process_eth1_data_reset(state);
    unphased::process_effective_balance_updates(state, |_| P::MAX_EFFECTIVE_BALANCE, cancel)?;
    unphased::process_slashings_reset(state);
    unphased::process_randao_mixes_reset(state);

    // > [Modified in Capella]
    process_historical_summaries_update(state)?;

    altair::process_participation_flag_updates(state);
    altair::process_sync_committee_updates(state)
}

pub fn process_historical_summaries_update<P: Preset>(
    state: &mut impl PostCapellaBeaconState<P>,
) -> Result<()> {
    let next_epoch = get_next_epoch(state);

    // > Set historical block root accumulator.
    if unphased::is_historical_accumulation_epoch::<P>(next_epoch) {
        let historical_summary = HistoricalSummary {
            block_summary_root: state.block_roots().tree_hash_root(),
            state_summary_root: state.state_roots().tree_hash_root(),
        };

        state
            .historical_summaries_mut()
            .push(historical_summary)
            .map_err(|_| HelperError::ListFull)?;
    }

    Ok(())
}
