//! Processing times of blocks and epochs, labelled by the phase of the state.
//!
//! Nothing is recorded until the embedding application installs [`Metrics`] in [`METRICS`].

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::OnceCell;
use prometheus::{histogram_opts, HistogramTimer, HistogramVec};
use types::nonstandard::Phase;

pub static METRICS: OnceCell<Arc<Metrics>> = OnceCell::new();

#[derive(Debug)]
pub struct Metrics {
    pub block_transition_times: HistogramVec,
    pub epoch_processing_times: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        Ok(Self {
            block_transition_times: HistogramVec::new(
                histogram_opts!(
                    "BLOCK_TRANSITION_TIMES",
                    "Transition function block processing times",
                ),
                &["phase"],
            )?,

            epoch_processing_times: HistogramVec::new(
                histogram_opts!(
                    "EPOCH_PROCESSING_TIMES",
                    "Transition function epoch processing times",
                ),
                &["phase"],
            )?,
        })
    }

    pub fn register_with_default_metrics(&self) -> Result<()> {
        let default_registry = prometheus::default_registry();

        default_registry.register(Box::new(self.block_transition_times.clone()))?;
        default_registry.register(Box::new(self.epoch_processing_times.clone()))?;

        Ok(())
    }

    #[must_use]
    pub fn block_transition_timer(&self, phase: Phase) -> HistogramTimer {
        self.block_transition_times
            .with_label_values(&[phase.as_ref()])
            .start_timer()
    }

    #[must_use]
    pub fn epoch_processing_timer(&self, phase: Phase) -> HistogramTimer {
        self.epoch_processing_times
            .with_label_values(&[phase.as_ref()])
            .start_timer()
    }
}
