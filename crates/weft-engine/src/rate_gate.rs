use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use weft_core::error::Result;
use weft_store::SqliteStore;

/// Limits how many runs a workflow may start per rolling hour.
///
/// The check is query-then-act with no lock: two concurrent callers for the
/// same workflow can both be admitted.
pub struct RateGate<'a> {
    store: &'a SqliteStore,
}

impl<'a> RateGate<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// True when fewer than `max_per_hour` runs started in the hour before `now`.
    pub fn allow(&self, workflow_id: &str, max_per_hour: u32, now: DateTime<Utc>) -> Result<bool> {
        let recent = self
            .store
            .count_runs_since(workflow_id, now - Duration::hours(1))?;
        let allowed = recent < u64::from(max_per_hour);
        if !allowed {
            debug!(workflow_id, recent, max_per_hour, "Rate gate closed");
        }
        Ok(allowed)
    }
}
