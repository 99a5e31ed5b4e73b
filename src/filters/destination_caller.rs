//! Destination-caller filter.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::B256;

use crate::chain::Chain;
use crate::types::{Domain, MessageState};

use super::{FilterError, MessageFilter, Verdict};

/// Drops messages whose designated destination caller this relayer cannot
/// satisfy. The all-zero caller is permissionless and passes unless
/// `destination_caller_only` forces the relayer to be the designated
/// caller.
#[derive(Debug)]
pub struct DestinationCallerFilter {
    registered_domains: Arc<HashMap<Domain, Arc<dyn Chain>>>,
    destination_caller_only: bool,
}

impl DestinationCallerFilter {
    pub fn new(
        registered_domains: Arc<HashMap<Domain, Arc<dyn Chain>>>,
        destination_caller_only: bool,
    ) -> Self {
        Self {
            registered_domains,
            destination_caller_only,
        }
    }
}

impl MessageFilter for DestinationCallerFilter {
    fn name(&self) -> &'static str {
        "destination-caller"
    }

    fn filter(&self, msg: &MessageState) -> Result<Verdict, FilterError> {
        let Some(chain) = self.registered_domains.get(&msg.dest_domain) else {
            return Ok(Verdict::drop(format!(
                "destination caller check failed: no chain registered for dest_domain={}",
                msg.dest_domain
            )));
        };

        if msg.destination_caller == B256::ZERO && self.destination_caller_only {
            return Ok(Verdict::drop(format!(
                "permissionless message dropped: destination-caller-only mode, source_domain={} dest_domain={}",
                msg.source_domain, msg.dest_domain
            )));
        }

        let (valid, address) = chain.is_destination_caller(&msg.destination_caller);
        if valid {
            return Ok(Verdict::Pass);
        }

        Ok(Verdict::drop(format!(
            "destination caller mismatch: source_domain={} dest_domain={} caller={address}",
            msg.source_domain, msg.dest_domain
        )))
    }
}
