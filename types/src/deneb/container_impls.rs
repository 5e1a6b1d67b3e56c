use tree_hash::TreeHash as _;

use crate::{
    deneb::containers::{ExecutionPayload, ExecutionPayloadHeader},
    preset::Preset,
};

impl<P: Preset> From<&ExecutionPayload<P>> for ExecutionPayloadHeader<P> {
    fn from(payload: &ExecutionPayload<P>) -> Self {
        let ExecutionPayload {
            parent_hash,
            fee_recipient,
            state_root,
            receipts_root,
            ref logs_bloom,
            prev_randao,
            block_number,
            gas_limit,
            gas_used,
            timestamp,
            ref extra_data,
            base_fee_per_gas,
            block_hash,
            ref transactions,
            ref withdrawals,
            blob_gas_used,
            excess_blob_gas,
        } = *payload;

        Self {
            parent_hash,
            fee_recipient,
            state_root,
            receipts_root,
            logs_bloom: logs_bloom.clone(),
            prev_randao,
            block_number,
            gas_limit,
            gas_used,
            timestamp,
            extra_data: extra_data.clone(),
            base_fee_per_gas,
            block_hash,
            transactions_root: transactions.tree_hash_root(),
            withdrawals_root: withdrawals.tree_hash_root(),
            blob_gas_used,
            excess_blob_gas,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{phase0::primitives::H256, preset::Minimal};

    use super::*;

    #[test]
    fn header_commits_to_payload_lists() {
        let payload = ExecutionPayload::<Minimal> {
            block_hash: H256::repeat_byte(1),
            blob_gas_used: 3,
            ..ExecutionPayload::default()
        };

        let header = ExecutionPayloadHeader::from(&payload);

        assert_eq!(header.block_hash, payload.block_hash);
        assert_eq!(header.blob_gas_used, 3);
        assert_eq!(header.transactions_root, payload.transactions.tree_hash_root());
        assert_ne!(header.withdrawals_root, H256::ZERO);
    }
}
