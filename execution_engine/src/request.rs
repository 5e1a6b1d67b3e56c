use enum_map::Enum;
use parse_display::Display;
use thiserror::Error;
use types::{
    bellatrix::containers::ExecutionPayload as BellatrixExecutionPayload,
    capella::containers::ExecutionPayload as CapellaExecutionPayload,
    deneb::{containers::ExecutionPayload as DenebExecutionPayload, primitives::VersionedHash},
    electra::containers::ExecutionRequests,
    nonstandard::Phase,
    phase0::primitives::{ExecutionBlockHash, H256},
    preset::Preset,
};

/// Everything the execution layer needs to validate one payload.
///
/// Electra reuses the Deneb payload and adds the requests it carries.
#[derive(Clone, Copy, Debug)]
pub enum NewPayloadRequest<'payload, P: Preset> {
    Bellatrix {
        payload: &'payload BellatrixExecutionPayload<P>,
    },
    Capella {
        payload: &'payload CapellaExecutionPayload<P>,
    },
    Deneb {
        payload: &'payload DenebExecutionPayload<P>,
        versioned_hashes: &'payload [VersionedHash],
        parent_beacon_block_root: H256,
    },
    Electra {
        payload: &'payload DenebExecutionPayload<P>,
        versioned_hashes: &'payload [VersionedHash],
        parent_beacon_block_root: H256,
        execution_requests: &'payload ExecutionRequests<P>,
    },
}

impl<'payload, P: Preset> NewPayloadRequest<'payload, P> {
    #[must_use]
    pub const fn phase(self) -> Phase {
        match self {
            Self::Bellatrix { .. } => Phase::Bellatrix,
            Self::Capella { .. } => Phase::Capella,
            Self::Deneb { .. } => Phase::Deneb,
            Self::Electra { .. } => Phase::Electra,
        }
    }

    #[must_use]
    pub const fn block_hash(self) -> ExecutionBlockHash {
        match self {
            Self::Bellatrix { payload } => payload.block_hash,
            Self::Capella { payload } => payload.block_hash,
            Self::Deneb { payload, .. } | Self::Electra { payload, .. } => payload.block_hash,
        }
    }

    /// Versioned hashes of blob commitments. Empty before Deneb.
    #[must_use]
    pub const fn versioned_hashes(self) -> &'payload [VersionedHash] {
        match self {
            Self::Bellatrix { .. } | Self::Capella { .. } => &[],
            Self::Deneb {
                versioned_hashes, ..
            }
            | Self::Electra {
                versioned_hashes, ..
            } => versioned_hashes,
        }
    }
}

/// The checks performed on a payload, in the order they are performed.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, Enum)]
pub enum PayloadCheck {
    #[display("block hash")]
    BlockHash,
    #[display("versioned hashes")]
    VersionedHashes,
    #[display("execution")]
    Execution,
}

/// Outcome of a payload that the engine was able to judge.
///
/// An engine that cannot judge a payload reports [`Error`] instead.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PayloadStatus {
    Valid,
    Invalid(PayloadCheck),
}

impl PayloadStatus {
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum Error {
    #[error("execution engine could not perform {check} check")]
    Unavailable { check: PayloadCheck },
}
