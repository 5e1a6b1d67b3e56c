use anyhow::Result;
use helper_functions::accessors::get_current_epoch;
use log::debug;
use tokio_util::sync::CancellationToken;
use types::{
    bellatrix::beacon_state::BeaconState as BellatrixBeaconState, config::Config,
    preset::Preset,
};

use crate::{altair, unphased};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "metrics")]
use types::nonstandard::Phase;

// Same steps as in Altair. Only the penalty constants differ.
pub fn process_epoch<P: Preset>(
    config: &Config,
    state: &mut BellatrixBeaconState<P>,
    cancel: &CancellationToken,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _timer = METRICS
        .get()
        .map(|metrics| metrics.epoch_processing_timer(Phase::Bellatrix));

    debug!("processing Bellatrix epoch {}", get_current_epoch(state));

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
    unphased::process_historical_roots_update(state)?;
    altair::process_participation_flag_updates(state);
    altair::process_sync_committee_updates(state)
}
