use core::{cmp::Ordering, num::NonZeroU64};

use anyhow::Result;
use bls::SignatureBytes;
use typenum::Unsigned as _;
use types::{
    altair::consts::{PROPOSER_WEIGHT, WEIGHT_DENOMINATOR},
    config::Config,
    electra::{consts::COMPOUNDING_WITHDRAWAL_PREFIX, containers::PendingDeposit},
    nonstandard::{Phase, SlashingKind},
    phase0::{
        consts::{FAR_FUTURE_EPOCH, GENESIS_SLOT},
        containers::Validator,
        primitives::{Epoch, Gwei, ValidatorIndex},
    },
    preset::Preset,
    traits::{BeaconState, PostElectraBeaconState},
};

use crate::{
    accessors::{
        self, get_activation_exit_churn_limit, get_beacon_proposer_index,
        get_consolidation_churn_limit, get_current_epoch, get_validator_churn_limit,
    },
    block_rewards::{RewardLedger, Slashing},
    error::Error,
    misc::compute_activation_exit_epoch,
};

pub fn balance<P: Preset>(
    state: &mut (impl BeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
) -> Result<&mut Gwei> {
    usize::try_from(validator_index)
        .ok()
        .and_then(|index| state.balances_mut().get_mut(index))
        .ok_or_else(|| Error::ValidatorIndexOutOfBounds(validator_index).into())
}

pub fn validator_mut<P: Preset>(
    state: &mut (impl BeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
) -> Result<&mut Validator> {
    usize::try_from(validator_index)
        .ok()
        .and_then(|index| state.validators_mut().get_mut(index))
        .ok_or_else(|| Error::ValidatorIndexOutOfBounds(validator_index).into())
}

#[inline]
pub fn increase_balance(balance: &mut Gwei, delta: Gwei) {
    *balance = balance.saturating_add(delta);
}

#[inline]
pub fn decrease_balance(balance: &mut Gwei, delta: Gwei) {
    *balance = balance.saturating_sub(delta);
}

// > Initiate the exit of the validator with index ``index``.
//
// Used before Electra. Electra replaces the count-based queue with a balance-based one
// (see `crate::electra::initiate_validator_exit`).
pub fn initiate_validator_exit<P: Preset>(
    config: &Config,
    state: &mut (impl BeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
) -> Result<()> {
    // > Return if validator already initiated exit
    if accessors::validator(state, validator_index)?.exit_epoch != FAR_FUTURE_EPOCH {
        return Ok(());
    }

    // > Compute exit queue epoch
    let mut exit_queue_epoch = compute_activation_exit_epoch::<P>(get_current_epoch(state));
    let mut exit_queue_churn = 0;

    for validator in state.validators().iter() {
        let exit_epoch = validator.exit_epoch;

        if exit_epoch == FAR_FUTURE_EPOCH {
            continue;
        }

        match exit_epoch.cmp(&exit_queue_epoch) {
            Ordering::Less => {}
            Ordering::Equal => exit_queue_churn += 1,
            Ordering::Greater => {
                exit_queue_epoch = exit_epoch;
                exit_queue_churn = 1;
            }
        }
    }

    if exit_queue_churn >= get_validator_churn_limit(config, state)? {
        exit_queue_epoch = exit_queue_epoch
            .checked_add(1)
            .ok_or(Error::EpochOverflow)?;
    }

    // > Set validator exit epoch and withdrawable epoch
    let validator = validator_mut(state, validator_index)?;

    validator.exit_epoch = exit_queue_epoch;

    validator.withdrawable_epoch = exit_queue_epoch
        .checked_add(config.min_validator_withdrawability_delay)
        .ok_or(Error::EpochOverflow)?;

    Ok(())
}

// > Slash the validator with index ``slashed_index``.
//
// Phases before Electra differ in the minimum penalty and in how the proposer's share is computed.
pub fn slash_validator<P: Preset>(
    config: &Config,
    state: &mut (impl BeaconState<P> + ?Sized),
    slashed_index: ValidatorIndex,
    whistleblower_index: Option<ValidatorIndex>,
    kind: SlashingKind,
    ledger: impl RewardLedger,
) -> Result<()> {
    initiate_validator_exit(config, state, slashed_index)?;

    let (min_slashing_penalty, proposer_reward) = match state.phase() {
        Phase::Phase0 => (
            P::MIN_SLASHING_PENALTY_QUOTIENT,
            Some(P::PROPOSER_REWARD_QUOTIENT),
        ),
        Phase::Altair => (P::MIN_SLASHING_PENALTY_QUOTIENT_ALTAIR, None),
        _ => (P::MIN_SLASHING_PENALTY_QUOTIENT_BELLATRIX, None),
    };

    apply_slashing(
        state,
        SlashingQuotients {
            min_slashing_penalty,
            whistleblower_reward: P::WHISTLEBLOWER_REWARD_QUOTIENT,
            proposer_reward,
        },
        slashed_index,
        whistleblower_index,
        kind,
        ledger,
    )
}

pub(crate) struct SlashingQuotients {
    pub min_slashing_penalty: NonZeroU64,
    pub whistleblower_reward: NonZeroU64,
    /// Share of the whistleblower reward paid to the proposer.
    /// `None` means `PROPOSER_WEIGHT / WEIGHT_DENOMINATOR`.
    pub proposer_reward: Option<NonZeroU64>,
}

// Everything in `slash_validator` after the exit has been initiated.
pub(crate) fn apply_slashing<P: Preset>(
    state: &mut (impl BeaconState<P> + ?Sized),
    quotients: SlashingQuotients,
    slashed_index: ValidatorIndex,
    whistleblower_index: Option<ValidatorIndex>,
    kind: SlashingKind,
    mut ledger: impl RewardLedger,
) -> Result<()> {
    let epoch = get_current_epoch(state);
    let validator = validator_mut(state, slashed_index)?;
    let effective_balance = validator.effective_balance;
    let slashing_penalty = effective_balance / quotients.min_slashing_penalty;

    validator.slashed = true;
    validator.withdrawable_epoch = validator
        .withdrawable_epoch
        .max(epoch.saturating_add(P::EpochsPerSlashingsVector::U64));

    let slashings_index = accessors::ring_index::<P::EpochsPerSlashingsVector>(epoch);
    let slashings = state.slashings_mut();
    slashings[slashings_index] = slashings[slashings_index]
        .checked_add(effective_balance)
        .ok_or(Error::BalanceOverflow)?;

    decrease_balance(balance(state, slashed_index)?, slashing_penalty);

    // > Apply proposer and whistleblower rewards
    let proposer_index = get_beacon_proposer_index(state)?;
    let whistleblower_index = whistleblower_index.unwrap_or(proposer_index);
    let whistleblower_reward = effective_balance / quotients.whistleblower_reward;
    let proposer_reward = match quotients.proposer_reward {
        Some(quotient) => whistleblower_reward / quotient,
        None => whistleblower_reward * PROPOSER_WEIGHT / WEIGHT_DENOMINATOR,
    };
    let remaining_reward = whistleblower_reward - proposer_reward;

    increase_balance(balance(state, proposer_index)?, proposer_reward);
    increase_balance(balance(state, whistleblower_index)?, remaining_reward);

    ledger.record_slashing(Slashing {
        kind,
        slashed_index,
        penalty: slashing_penalty,
        whistleblower_index,
        whistleblower_reward: remaining_reward,
        proposer_reward,
    });

    Ok(())
}

pub fn switch_to_compounding_validator<P: Preset>(
    state: &mut (impl PostElectraBeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
) -> Result<()> {
    validator_mut(state, validator_index)?.withdrawal_credentials.0[0] =
        COMPOUNDING_WITHDRAWAL_PREFIX;

    queue_excess_active_balance(state, validator_index)
}

pub fn queue_excess_active_balance<P: Preset>(
    state: &mut (impl PostElectraBeaconState<P> + ?Sized),
    validator_index: ValidatorIndex,
) -> Result<()> {
    let balance = balance(state, validator_index)?;

    if *balance <= P::MIN_ACTIVATION_BALANCE {
        return Ok(());
    }

    let excess_balance = *balance - P::MIN_ACTIVATION_BALANCE;

    *balance = P::MIN_ACTIVATION_BALANCE;

    let validator = accessors::validator(state, validator_index)?;

    // > Use bls.G2_POINT_AT_INFINITY as a signature field placeholder
    // > and GENESIS_SLOT to distinguish from a pending deposit request
    let pending_deposit = PendingDeposit {
        pubkey: validator.pubkey.clone(),
        withdrawal_credentials: validator.withdrawal_credentials,
        amount: excess_balance,
        signature: SignatureBytes::empty(),
        slot: GENESIS_SLOT,
    };

    state
        .pending_deposits_mut()
        .push(pending_deposit)
        .map_err(|_| Error::ListFull)?;

    Ok(())
}

pub fn compute_exit_epoch_and_update_churn<P: Preset>(
    config: &Config,
    state: &mut (impl PostElectraBeaconState<P> + ?Sized),
    exit_balance: Gwei,
) -> Result<Epoch> {
    let per_epoch_churn = get_activation_exit_churn_limit(config, state)?;

    let (earliest_exit_epoch, exit_balance_to_consume) = consume_churn(
        state.earliest_exit_epoch(),
        state.exit_balance_to_consume(),
        compute_activation_exit_epoch::<P>(get_current_epoch(state)),
        per_epoch_churn,
        exit_balance,
    )?;

    *state.exit_balance_to_consume_mut() = exit_balance_to_consume;
    *state.earliest_exit_epoch_mut() = earliest_exit_epoch;

    Ok(earliest_exit_epoch)
}

pub fn compute_consolidation_epoch_and_update_churn<P: Preset>(
    config: &Config,
    state: &mut (impl PostElectraBeaconState<P> + ?Sized),
    consolidation_balance: Gwei,
) -> Result<Epoch> {
    let per_epoch_consolidation_churn = get_consolidation_churn_limit(config, state)?;

    let (earliest_consolidation_epoch, consolidation_balance_to_consume) = consume_churn(
        state.earliest_consolidation_epoch(),
        state.consolidation_balance_to_consume(),
        compute_activation_exit_epoch::<P>(get_current_epoch(state)),
        per_epoch_consolidation_churn,
        consolidation_balance,
    )?;

    *state.consolidation_balance_to_consume_mut() = consolidation_balance_to_consume;
    *state.earliest_consolidation_epoch_mut() = earliest_consolidation_epoch;

    Ok(earliest_consolidation_epoch)
}

// Shared by exits and consolidations. Returns the new earliest epoch and the balance left to
// consume in it.
fn consume_churn(
    stored_epoch: Epoch,
    stored_balance_to_consume: Gwei,
    activation_exit_epoch: Epoch,
    per_epoch_churn: Gwei,
    balance: Gwei,
) -> Result<(Epoch, Gwei)> {
    let mut earliest_epoch = stored_epoch.max(activation_exit_epoch);

    // > New epoch for exits.
    let mut balance_to_consume = if stored_epoch < earliest_epoch {
        per_epoch_churn
    } else {
        stored_balance_to_consume
    };

    // > Exit doesn't fit in the current earliest epoch.
    if balance > balance_to_consume {
        // A zero churn is only possible for consolidations on tiny validator sets.
        let per_epoch_churn = NonZeroU64::new(per_epoch_churn).ok_or(Error::ZeroChurnLimit)?;
        let balance_to_process = balance - balance_to_consume;
        let additional_epochs = (balance_to_process - 1) / per_epoch_churn + 1;

        earliest_epoch = earliest_epoch
            .checked_add(additional_epochs)
            .ok_or(Error::EpochOverflow)?;

        balance_to_consume = additional_epochs
            .checked_mul(per_epoch_churn.get())
            .and_then(|churn| churn.checked_add(balance_to_consume))
            .ok_or(Error::BalanceOverflow)?;
    }

    // > Consume the balance and update state variables.
    Ok((earliest_epoch, balance_to_consume - balance))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use enum_map::enum_map;
    use types::{
        altair::beacon_state::BeaconState as AltairBeaconState,
        bellatrix::beacon_state::BeaconState as BellatrixBeaconState,
        electra::beacon_state::BeaconState as ElectraBeaconState,
        phase0::{beacon_state::BeaconState as Phase0BeaconState, primitives::H256},
        preset::{Mainnet, Minimal},
    };

    use crate::block_rewards::{BlockRewards, ProposerRewardSource};

    use super::*;

    fn active_validator(effective_balance: Gwei) -> Validator {
        Validator {
            effective_balance,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        }
    }

    #[test]
    fn test_validator_exit_init() -> Result<()> {
        let config = Config::minimal();

        let validator_1 = Validator {
            effective_balance: 24,
            activation_eligibility_epoch: 2,
            activation_epoch: 0,
            exit_epoch: 4,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        let validator_2 = Validator {
            effective_balance: 24,
            activation_eligibility_epoch: 2,
            activation_epoch: 0,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
            ..Validator::default()
        };

        let mut state = AltairBeaconState::<Minimal> {
            validators: Arc::new(vec![validator_1, validator_2].into()),
            balances: Arc::new(vec![24; 2].into()),
            ..AltairBeaconState::default()
        };

        // `exit_epoch` is already set and should remain the same.
        initiate_validator_exit(&config, &mut state, 0)?;

        // `exit_epoch` is `FAR_FUTURE_EPOCH` and should be set to the lowest possible value.
        initiate_validator_exit(&config, &mut state, 1)?;

        assert_eq!(state.validators[0].exit_epoch, 4);
        assert_eq!(state.validators[1].exit_epoch, 5);
        assert_eq!(
            state.validators[1].withdrawable_epoch,
            5 + config.min_validator_withdrawability_delay,
        );

        Ok(())
    }

    #[test]
    fn exiting_an_unknown_validator_fails() {
        let mut state = AltairBeaconState::<Minimal>::default();

        assert!(initiate_validator_exit(&Config::minimal(), &mut state, 0).is_err());
    }

    #[test]
    fn test_slash_validator() -> Result<()> {
        let validator = active_validator(Mainnet::MAX_EFFECTIVE_BALANCE);

        let mut state = BellatrixBeaconState::<Mainnet> {
            slot: <Mainnet as Preset>::SlotsPerEpoch::U64 * 3,
            validators: Arc::new(vec![validator].into()),
            balances: Arc::new(vec![Mainnet::MAX_EFFECTIVE_BALANCE].into()),
            ..BellatrixBeaconState::default()
        };

        let mut ledger = BlockRewards::default();

        slash_validator(
            &Config::mainnet(),
            &mut state,
            0,
            None,
            SlashingKind::Attester,
            &mut ledger,
        )?;

        let validator = &state.validators[0];

        assert!(validator.slashed);
        assert_eq!(validator.exit_epoch, 3 + 1 + 4);
        assert_eq!(validator.withdrawable_epoch, 3 + 8192);
        assert_eq!(state.slashings[3], Mainnet::MAX_EFFECTIVE_BALANCE);
        assert_eq!(
            ledger,
            BlockRewards {
                proposer_rewards: enum_map! {
                    ProposerRewardSource::AttesterSlashings => 7_812_500,
                    _ => 0,
                },
                slashings: vec![Slashing {
                    kind: SlashingKind::Attester,
                    slashed_index: 0,
                    penalty: 1_000_000_000,
                    whistleblower_index: 0,
                    whistleblower_reward: 54_687_500,
                    proposer_reward: 7_812_500,
                }],
                ..BlockRewards::default()
            },
        );

        Ok(())
    }

    #[test]
    fn altair_slashing_uses_the_larger_quotient() -> Result<()> {
        let mut state = AltairBeaconState::<Minimal> {
            validators: Arc::new(vec![active_validator(Minimal::MAX_EFFECTIVE_BALANCE); 2].into()),
            balances: Arc::new(vec![Minimal::MAX_EFFECTIVE_BALANCE; 2].into()),
            ..AltairBeaconState::default()
        };

        let mut ledger = BlockRewards::default();

        slash_validator(
            &Config::minimal(),
            &mut state,
            1,
            Some(1),
            SlashingKind::Proposer,
            &mut ledger,
        )?;

        assert_eq!(ledger.slashing_penalty(1), 500_000_000);

        Ok(())
    }

    #[test]
    fn phase0_slashing_pays_the_proposer_by_quotient() -> Result<()> {
        let mut state = Phase0BeaconState::<Mainnet> {
            validators: Arc::new(vec![active_validator(Mainnet::MAX_EFFECTIVE_BALANCE); 2].into()),
            balances: Arc::new(vec![Mainnet::MAX_EFFECTIVE_BALANCE; 2].into()),
            ..Phase0BeaconState::default()
        };

        let mut ledger = BlockRewards::default();

        slash_validator(
            &Config::mainnet(),
            &mut state,
            1,
            None,
            SlashingKind::Attester,
            &mut ledger,
        )?;

        let proposer_index = get_beacon_proposer_index(&state)?;
        let slashing = ledger.slashings[0];

        assert_eq!(ledger.slashings.len(), 1);

        // 32 ETH / 128 and (32 ETH / 512) / 8.
        assert_eq!(slashing.penalty, 250_000_000);
        assert_eq!(slashing.proposer_reward, 7_812_500);
        assert_eq!(slashing.whistleblower_index, proposer_index);
        assert_eq!(slashing.whistleblower_reward, 54_687_500);

        Ok(())
    }

    #[test]
    fn test_increase_balance() {
        let mut balance = 5;

        increase_balance(&mut balance, 10);

        assert_eq!(balance, 15);
    }

    #[test]
    fn test_decrease_balance() {
        let mut low_balance = 5;
        let mut high_balance = 10;

        decrease_balance(&mut low_balance, 10);
        decrease_balance(&mut high_balance, 5);

        assert_eq!(low_balance, 0);
        assert_eq!(high_balance, 5);
    }

    #[test]
    fn switching_to_compounding_queues_the_excess() -> Result<()> {
        let mut validator = active_validator(Minimal::MIN_ACTIVATION_BALANCE);

        validator.withdrawal_credentials = H256::repeat_byte(1);

        let mut state = ElectraBeaconState::<Minimal> {
            validators: Arc::new(vec![validator].into()),
            balances: Arc::new(vec![Minimal::MIN_ACTIVATION_BALANCE + 5].into()),
            ..ElectraBeaconState::default()
        };

        switch_to_compounding_validator(&mut state, 0)?;

        assert_eq!(
            state.validators[0].withdrawal_credentials[0],
            COMPOUNDING_WITHDRAWAL_PREFIX,
        );
        assert_eq!(state.balances[0], Minimal::MIN_ACTIVATION_BALANCE);
        assert_eq!(state.pending_deposits.len(), 1);
        assert_eq!(state.pending_deposits[0].amount, 5);
        assert_eq!(state.pending_deposits[0].slot, GENESIS_SLOT);
        assert!(state.pending_deposits[0].signature.is_empty());

        Ok(())
    }

    #[test]
    fn churn_spills_into_later_epochs() -> Result<()> {
        // 10 units of churn per epoch. The first epoch still has 4 units left.
        assert_eq!(consume_churn(5, 4, 5, 10, 3)?, (5, 1));
        assert_eq!(consume_churn(5, 4, 5, 10, 25)?, (7, 1));

        // The stored epoch is in the past, so the queue starts over with a fresh allowance.
        assert_eq!(consume_churn(2, 0, 5, 10, 10)?, (5, 0));

        Ok(())
    }

    #[test]
    fn zero_churn_limit_is_reported_as_such() -> Result<()> {
        let error = consume_churn(5, 0, 5, 0, 1)
            .expect_err("balance cannot be consumed without churn");

        assert_eq!(error.downcast::<Error>()?, Error::ZeroChurnLimit);

        // Balance that fits in what is left of the current epoch needs no churn.
        assert_eq!(consume_churn(5, 3, 5, 0, 3)?, (5, 0));

        Ok(())
    }
}
