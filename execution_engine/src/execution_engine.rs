use core::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use enum_map::EnumMap;
use log::debug;
use types::preset::Preset;

use crate::request::{Error, NewPayloadRequest, PayloadCheck, PayloadStatus};

/// The execution layer as seen by block processing.
///
/// Each check returns `Ok(true)` or `Ok(false)` when the engine could judge the payload and
/// [`Error::Unavailable`] when it could not.
pub trait ExecutionEngine<P: Preset> {
    const IS_NULL: bool;

    /// [`is_valid_block_hash`](https://github.com/ethereum/consensus-specs/blob/dev/specs/deneb/beacon-chain.md#is_valid_block_hash)
    fn is_valid_block_hash(&self, request: NewPayloadRequest<P>) -> Result<bool>;

    /// [`is_valid_versioned_hashes`](https://github.com/ethereum/consensus-specs/blob/dev/specs/deneb/beacon-chain.md#is_valid_versioned_hashes)
    fn is_valid_versioned_hashes(&self, request: NewPayloadRequest<P>) -> Result<bool>;

    /// [`notify_new_payload`](https://github.com/ethereum/consensus-specs/blob/dev/specs/bellatrix/beacon-chain.md#notify_new_payload)
    fn notify_new_payload(&self, request: NewPayloadRequest<P>) -> Result<bool>;

    /// [`verify_and_notify_new_payload`](https://github.com/ethereum/consensus-specs/blob/dev/specs/deneb/beacon-chain.md#verify_and_notify_new_payload)
    ///
    /// Stops at the first check that fails or cannot be performed.
    fn verify_and_notify_new_payload(
        &self,
        request: NewPayloadRequest<P>,
    ) -> Result<PayloadStatus> {
        let checks = [
            PayloadCheck::BlockHash,
            PayloadCheck::VersionedHashes,
            PayloadCheck::Execution,
        ];

        for check in checks {
            let passed = match check {
                PayloadCheck::BlockHash => self.is_valid_block_hash(request)?,
                PayloadCheck::VersionedHashes => self.is_valid_versioned_hashes(request)?,
                PayloadCheck::Execution => self.notify_new_payload(request)?,
            };

            if !passed {
                debug!(
                    "execution payload {:?} failed {check} check",
                    request.block_hash(),
                );

                return Ok(PayloadStatus::Invalid(check));
            }
        }

        Ok(PayloadStatus::Valid)
    }
}

impl<P: Preset, E: ExecutionEngine<P>> ExecutionEngine<P> for &E {
    const IS_NULL: bool = E::IS_NULL;

    fn is_valid_block_hash(&self, request: NewPayloadRequest<P>) -> Result<bool> {
        (*self).is_valid_block_hash(request)
    }

    fn is_valid_versioned_hashes(&self, request: NewPayloadRequest<P>) -> Result<bool> {
        (*self).is_valid_versioned_hashes(request)
    }

    fn notify_new_payload(&self, request: NewPayloadRequest<P>) -> Result<bool> {
        (*self).notify_new_payload(request)
    }

    fn verify_and_notify_new_payload(
        &self,
        request: NewPayloadRequest<P>,
    ) -> Result<PayloadStatus> {
        (*self).verify_and_notify_new_payload(request)
    }
}

/// Accepts every payload without looking at it.
#[derive(Clone, Copy)]
pub struct NullExecutionEngine;

impl<P: Preset> ExecutionEngine<P> for NullExecutionEngine {
    const IS_NULL: bool = true;

    fn is_valid_block_hash(&self, _request: NewPayloadRequest<P>) -> Result<bool> {
        Ok(true)
    }

    fn is_valid_versioned_hashes(&self, _request: NewPayloadRequest<P>) -> Result<bool> {
        Ok(true)
    }

    fn notify_new_payload(&self, _request: NewPayloadRequest<P>) -> Result<bool> {
        Ok(true)
    }

    fn verify_and_notify_new_payload(
        &self,
        _request: NewPayloadRequest<P>,
    ) -> Result<PayloadStatus> {
        Ok(PayloadStatus::Valid)
    }
}

/// Scripted answer of [`MockExecutionEngine`] to one check.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum Verdict {
    #[default]
    Valid,
    Invalid,
    Unavailable,
}

/// Engine with a scripted answer per check. Counts how often each check was performed.
#[derive(Default)]
pub struct MockExecutionEngine {
    verdicts: EnumMap<PayloadCheck, Verdict>,
    calls: EnumMap<PayloadCheck, AtomicUsize>,
}

impl<P: Preset> ExecutionEngine<P> for MockExecutionEngine {
    const IS_NULL: bool = false;

    fn is_valid_block_hash(&self, _request: NewPayloadRequest<P>) -> Result<bool> {
        self.answer(PayloadCheck::BlockHash)
    }

    fn is_valid_versioned_hashes(&self, _request: NewPayloadRequest<P>) -> Result<bool> {
        self.answer(PayloadCheck::VersionedHashes)
    }

    fn notify_new_payload(&self, _request: NewPayloadRequest<P>) -> Result<bool> {
        self.answer(PayloadCheck::Execution)
    }
}

impl MockExecutionEngine {
    /// An engine that answers every check with `verdict`.
    #[must_use]
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdicts: EnumMap::from_fn(|_| verdict),
            calls: EnumMap::default(),
        }
    }

    #[must_use]
    pub fn with_verdict(mut self, check: PayloadCheck, verdict: Verdict) -> Self {
        self.verdicts[check] = verdict;
        self
    }

    #[must_use]
    pub fn calls(&self, check: PayloadCheck) -> usize {
        self.calls[check].load(Ordering::Relaxed)
    }

    fn answer(&self, check: PayloadCheck) -> Result<bool> {
        self.calls[check].fetch_add(1, Ordering::Relaxed);

        match self.verdicts[check] {
            Verdict::Valid => Ok(true),
            Verdict::Invalid => Ok(false),
            Verdict::Unavailable => Err(Error::Unavailable { check }.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use types::{deneb::containers::ExecutionPayload, phase0::primitives::H256, preset::Minimal};

    use super::*;

    fn request(payload: &ExecutionPayload<Minimal>) -> NewPayloadRequest<'_, Minimal> {
        NewPayloadRequest::Deneb {
            payload,
            versioned_hashes: &[],
            parent_beacon_block_root: H256::ZERO,
        }
    }

    #[test]
    fn null_engine_accepts_everything() -> Result<()> {
        let payload = ExecutionPayload::default();

        assert_eq!(
            NullExecutionEngine.verify_and_notify_new_payload(request(&payload))?,
            PayloadStatus::Valid,
        );

        Ok(())
    }

    #[test_case(PayloadCheck::BlockHash => [1, 0, 0])]
    #[test_case(PayloadCheck::VersionedHashes => [1, 1, 0])]
    #[test_case(PayloadCheck::Execution => [1, 1, 1])]
    fn checks_short_circuit_on_first_invalid(failing: PayloadCheck) -> [usize; 3] {
        let payload = ExecutionPayload::default();
        let engine = MockExecutionEngine::default().with_verdict(failing, Verdict::Invalid);

        let status = engine
            .verify_and_notify_new_payload(request(&payload))
            .expect("mock engine is available");

        assert_eq!(status, PayloadStatus::Invalid(failing));

        [
            engine.calls(PayloadCheck::BlockHash),
            engine.calls(PayloadCheck::VersionedHashes),
            engine.calls(PayloadCheck::Execution),
        ]
    }

    #[test]
    fn unavailable_engine_is_an_error_not_a_verdict() -> Result<()> {
        let payload = ExecutionPayload::default();
        let engine = MockExecutionEngine::default()
            .with_verdict(PayloadCheck::VersionedHashes, Verdict::Unavailable);

        let error = engine
            .verify_and_notify_new_payload(request(&payload))
            .expect_err("engine should fail");

        assert_eq!(
            error.downcast::<Error>()?,
            Error::Unavailable {
                check: PayloadCheck::VersionedHashes,
            },
        );
        assert_eq!(engine.calls(PayloadCheck::Execution), 0);

        Ok(())
    }

    #[test]
    fn uniform_mock_answers_every_check() -> Result<()> {
        let payload = ExecutionPayload::default();
        let engine = MockExecutionEngine::new(Verdict::Valid);

        assert!(engine
            .verify_and_notify_new_payload(request(&payload))?
            .is_valid());
        assert_eq!(engine.calls(PayloadCheck::Execution), 1);

        Ok(())
    }
}
