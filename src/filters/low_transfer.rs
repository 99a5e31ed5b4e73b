//! Low-transfer filter.

use std::collections::HashMap;

use alloy_primitives::U256;

use crate::config::ChainSettings;
use crate::types::{BurnMessage, Domain, MessageState};

use super::{FilterError, MessageFilter, Verdict};

/// Drops transfers below the destination chain's configured minimum mint
/// amount. Message bodies that are not valid burn messages are dropped too.
#[derive(Debug)]
pub struct LowTransferFilter {
    min_amounts: HashMap<Domain, u64>,
}

impl LowTransferFilter {
    pub fn new(chains: &HashMap<String, ChainSettings>) -> Self {
        let min_amounts = chains
            .values()
            .map(|chain| (chain.domain, chain.min_mint_amount))
            .collect();
        Self { min_amounts }
    }
}

impl MessageFilter for LowTransferFilter {
    fn name(&self) -> &'static str {
        "low-transfer"
    }

    fn filter(&self, msg: &MessageState) -> Result<Verdict, FilterError> {
        let burn = match BurnMessage::parse(&msg.msg_body) {
            Ok(burn) => burn,
            Err(e) => {
                return Ok(Verdict::drop(format!("not a valid burn message: {e}")));
            }
        };

        let min_amount = self
            .min_amounts
            .get(&msg.dest_domain)
            .copied()
            .unwrap_or(0);
        if min_amount == 0 {
            return Ok(Verdict::Pass);
        }

        if burn.amount < U256::from(min_amount) {
            return Ok(Verdict::drop(format!(
                "transfer amount too low: amount={} min_amount={min_amount} dest_domain={}",
                burn.amount, msg.dest_domain
            )));
        }

        Ok(Verdict::Pass)
    }
}
