use hex_literal::hex;

use crate::phase0::primitives::{DomainType, H32};

pub const DOMAIN_BLS_TO_EXECUTION_CHANGE: DomainType = H32::new(hex!("0a000000"));
