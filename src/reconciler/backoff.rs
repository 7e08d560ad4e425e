//! Exponential backoff with full jitter (§4.6/§7): initial 500ms, capped
//! at 30s. Used when a transient databroker error means an Ingress key
//! must be re-enqueued later rather than retried inline.

use std::time::Duration;

use rand::Rng;

const INITIAL: Duration = Duration::from_millis(500);
const CAP: Duration = Duration::from_secs(30);

/// `attempt` is 0 for the first retry, 1 for the second, and so on.
pub fn next_delay(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    let ceiling = INITIAL.saturating_mul(factor).min(CAP);
    let millis = rand::thread_rng().gen_range(0..=ceiling.as_millis().max(1) as u64);
    Duration::from_millis(millis)
}
