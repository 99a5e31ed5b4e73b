//! Fast Transfer re-attestation.
//!
//! A v2 attestation is only valid until `expiration_block` on the
//! destination chain. [`handle_expiring`] decides, against the current
//! destination height and the configured buffer, whether to request a fresh
//! signature; [`apply`] folds the outcome into message state under the
//! message lock. The decision and the mutation are split so the decision can
//! run without holding any lock across I/O.

use std::collections::HashMap;

use chrono::Utc;
use tracing::info;

use crate::attestation::{AttestationClient, AttestationError, parse_expiration_block};
use crate::config::CircleSettings;
use crate::types::{Domain, MessageStatus, SharedMessage};

/// Outcome of one re-attestation decision.
#[derive(Debug, Default)]
pub struct ReattestOutcome {
    /// The attestation was within the expiration buffer and re-attestation
    /// was attempted (or found to be out of budget).
    pub should_reattest: bool,
    /// Fresh attestation returned by the service.
    pub new_attestation: Option<String>,
    /// Refreshed expiration block; zero when unknown.
    pub new_expiration_block: u64,
    /// The retry budget is spent; the message is failed on apply.
    pub exhausted_retries: bool,
    /// The re-attestation request itself failed; drop the message from the
    /// broadcast queue and retry on a later pass.
    pub remove_from_queue: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ReattestError {
    #[error("max re-attestation attempts reached for nonce {nonce} (attempts: {attempts})")]
    RetriesExhausted { nonce: u64, attempts: u32 },
    #[error("re-attestation failed for nonce {nonce}: {source}")]
    Request {
        nonce: u64,
        source: AttestationError,
    },
}

/// Checks whether a Fast Transfer attestation is expiring and requests a
/// re-attestation when it is. Returns the outcome to apply plus any error
/// worth surfacing; an outcome is produced even on error so the attempt is
/// always accounted against the budget.
pub async fn handle_expiring(
    client: &AttestationClient,
    msg: &SharedMessage,
    settings: &CircleSettings,
    current_block: u64,
) -> (ReattestOutcome, Option<ReattestError>) {
    let mut outcome = ReattestOutcome::default();

    let (expiration_block, reattest_count, source_domain, nonce, source_tx_hash) = {
        let guard = msg.lock();
        (
            guard.expiration_block,
            guard.reattest_count,
            guard.source_domain,
            guard.nonce,
            guard.source_tx_hash.clone(),
        )
    };

    // Not a Fast Transfer, or no expiration known.
    if expiration_block == 0 {
        return (outcome, None);
    }

    if current_block.saturating_add(settings.expiration_buffer()) < expiration_block {
        return (outcome, None); // not expiring yet
    }

    outcome.should_reattest = true;

    let max_retries = settings.effective_reattest_max_retries();
    if reattest_count >= max_retries {
        outcome.exhausted_retries = true;
        let err = ReattestError::RetriesExhausted {
            nonce,
            attempts: reattest_count,
        };
        return (outcome, Some(err));
    }

    info!(
        nonce,
        current_block, expiration_block, "Fast Transfer attestation expiring soon, re-attesting"
    );

    let new_attestation = match client.reattest(source_domain, nonce).await {
        Ok(response) => response,
        Err(source) => {
            outcome.remove_from_queue = true;
            return (outcome, Some(ReattestError::Request { nonce, source }));
        }
    };
    outcome.new_attestation = Some(new_attestation.attestation);

    // Refresh the expiration block; failure here is non-fatal, the new
    // expiration is simply unknown until the next pass.
    match client.v2_message(&source_tx_hash, source_domain).await {
        Ok(updated) => {
            outcome.new_expiration_block = parse_expiration_block(&updated.expiration_block);
        }
        Err(e) => {
            info!(nonce, error = %e, "Failed to fetch updated expiration after re-attestation");
        }
    }

    info!(nonce, "Re-attestation successful");
    (outcome, None)
}

/// Applies a re-attestation outcome to the message under its lock.
pub fn apply(msg: &SharedMessage, outcome: &ReattestOutcome) {
    if !outcome.should_reattest {
        return;
    }

    let now = Utc::now();
    let mut guard = msg.lock();

    guard.reattest_count += 1;
    guard.last_reattest_time = Some(now);

    if outcome.exhausted_retries {
        guard.status = MessageStatus::Failed;
        guard.updated = now;
        return;
    }

    if let Some(attestation) = &outcome.new_attestation
        && !attestation.is_empty()
    {
        guard.attestation = Some(attestation.clone());
        guard.updated = now;
    }

    if outcome.new_expiration_block > 0 {
        guard.expiration_block = outcome.new_expiration_block;
    }
}

/// Removes that exact message from its destination's broadcast bucket,
/// deleting the bucket once emptied.
pub fn remove_from_queue(
    queue: &mut HashMap<Domain, Vec<SharedMessage>>,
    dest_domain: Domain,
    msg: &SharedMessage,
) {
    let Some(bucket) = queue.get_mut(&dest_domain) else {
        return;
    };

    bucket.retain(|m| !std::sync::Arc::ptr_eq(m, msg));

    if bucket.is_empty() {
        queue.remove(&dest_domain);
    }
}
