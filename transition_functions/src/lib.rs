//! State transitions of the beacon chain from Phase 0 to Electra.
//!
//! [`combined`] is the entry point. The per-phase modules apply a single block or epoch to a
//! state of their own phase and leave classification of failures to the caller.

pub mod combined;

#[cfg(feature = "metrics")]
pub mod metrics;

pub mod unphased {
    pub use error::Error;
    pub use slot_processing::{process_slot, ProcessSlots};
    pub use state_transition::StateRootPolicy;

    pub(crate) use block_processing::{
        is_valid_deposit_signature, process_block_header, process_eth1_data, process_randao,
        slashable_indices, validate_attestation_data, validate_attester_slashing_data,
        validate_deposit_count, validate_proposer_slashing, validate_voluntary_exit,
        verify_deposit_merkle_branch,
    };
    pub(crate) use epoch_intermediates::EpochDeltas;
    pub(crate) use epoch_processing::{
        is_historical_accumulation_epoch, process_effective_balance_updates,
        process_eth1_data_reset, process_historical_roots_update, process_randao_mixes_reset,
        process_registry_updates, process_rewards_and_penalties, process_slashings,
        process_slashings_reset, should_process_justification_and_finalization,
        should_process_rewards_and_penalties, weigh_justification_and_finalization,
    };

    pub(crate) mod cancellation;

    mod block_processing;
    mod epoch_intermediates;
    mod epoch_processing;
    mod error;
    mod slot_processing;
    mod state_transition;
}

pub mod phase0 {
    pub use block_processing::process_block;
    pub use epoch_intermediates::{Inclusion, Performance, Statistics, ValidatorSummary};
    pub use epoch_processing::process_epoch;

    mod block_processing;
    mod epoch_intermediates;
    mod epoch_processing;
}

pub mod altair {
    pub use block_processing::process_block;
    pub use epoch_intermediates::{Statistics, ValidatorSummary};
    pub use epoch_processing::process_epoch;

    pub(crate) use block_processing::{
        add_validator_to_registry, apply_attestation, header_of, process_attester_slashing,
        process_operations, process_proposer_slashing, process_sync_aggregate,
        process_voluntary_exit, Operations,
    };
    pub(crate) use epoch_intermediates::statistics;
    pub(crate) use epoch_processing::{
        process_inactivity_updates, process_justification_and_finalization,
        process_participation_flag_updates, process_rewards_and_penalties,
        process_sync_committee_updates,
    };

    mod block_processing;
    mod epoch_intermediates;
    mod epoch_processing;
}

pub mod bellatrix {
    pub use block_processing::{is_execution_enabled, process_block};
    pub use epoch_processing::process_epoch;

    pub(crate) use block_processing::{
        validate_payload_consistency, verify_with_engine, PayloadSummary,
    };

    mod block_processing;
    mod epoch_processing;
}

pub mod capella {
    pub use block_processing::{
        get_expected_withdrawals, process_block, validate_bls_to_execution_change,
    };
    pub use epoch_processing::process_epoch;

    pub(crate) use block_processing::{
        apply_withdrawals, next_in_sweep, process_bls_to_execution_changes, process_withdrawals,
    };
    pub(crate) use epoch_processing::process_historical_summaries_update;

    mod block_processing;
    mod epoch_processing;
}

// Deneb reuses Capella epoch processing.
pub mod deneb {
    pub use block_processing::process_block;

    pub(crate) use block_processing::blob_versioned_hashes;

    mod block_processing;
}

pub mod electra {
    pub use block_processing::{get_expected_withdrawals, process_block};
    pub use epoch_processing::process_epoch;

    mod block_processing;
    mod epoch_processing;
}
