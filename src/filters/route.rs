//! Enabled-routes filter.

use std::collections::HashMap;

use crate::types::{Domain, MessageState};

use super::{FilterError, MessageFilter, Verdict};

/// Drops messages on routes that relaying is not enabled for.
#[derive(Debug)]
pub struct RouteFilter {
    enabled_routes: HashMap<Domain, Vec<Domain>>,
}

impl RouteFilter {
    pub fn new(enabled_routes: HashMap<Domain, Vec<Domain>>) -> Self {
        Self { enabled_routes }
    }
}

impl MessageFilter for RouteFilter {
    fn name(&self) -> &'static str {
        "route"
    }

    fn filter(&self, msg: &MessageState) -> Result<Verdict, FilterError> {
        let Some(dest_domains) = self.enabled_routes.get(&msg.source_domain) else {
            return Ok(Verdict::drop(format!(
                "route disabled: source_domain={} dest_domain={} (source not configured)",
                msg.source_domain, msg.dest_domain
            )));
        };

        if dest_domains.contains(&msg.dest_domain) {
            return Ok(Verdict::Pass);
        }

        Ok(Verdict::drop(format!(
            "route disabled: source_domain={} dest_domain={} (destination not in route)",
            msg.source_domain, msg.dest_domain
        )))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;

    use super::*;
    use crate::test_utils::message;

    fn filter() -> RouteFilter {
        RouteFilter::new(HashMap::from([
            (Domain(0), vec![Domain(1), Domain(2)]),
            (Domain(4), vec![Domain(0)]),
        ]))
    }

    #[test]
    fn enabled_route_passes() {
        let verdict = filter()
            .filter(&message(Domain(0), Domain(1), B256::ZERO, &[]))
            .unwrap();
        assert_eq!(verdict, Verdict::Pass);
    }

    #[test]
    fn unlisted_destination_is_dropped() {
        let verdict = filter()
            .filter(&message(Domain(0), Domain(4), B256::ZERO, &[]))
            .unwrap();
        assert!(matches!(
            verdict,
            Verdict::Drop { reason } if reason.contains("destination not in route")
        ));
    }

    #[test]
    fn unconfigured_source_is_dropped() {
        let verdict = filter()
            .filter(&message(Domain(9), Domain(0), B256::ZERO, &[]))
            .unwrap();
        assert!(matches!(
            verdict,
            Verdict::Drop { reason } if reason.contains("source not configured")
        ));
    }
}
