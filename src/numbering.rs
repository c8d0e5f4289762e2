use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;

/// Produces human-readable reference numbers of the form `PREFIX-YYYYMMDD-NNN`.
///
/// Candidates are not guaranteed unique; callers run a bounded
/// generate-check-retry loop against the backing store. Deployments with real
/// concurrent writers should supply a collision-free strategy instead of the
/// random default.
pub trait ReferenceNumberGenerator: Send + Sync {
    fn generate(&self, prefix: &str, on: DateTime<Utc>) -> String;
}

/// Random three-digit suffix. Collisions within a day are possible and
/// absorbed by the caller's retry loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomSuffixGenerator;

impl ReferenceNumberGenerator for RandomSuffixGenerator {
    fn generate(&self, prefix: &str, on: DateTime<Utc>) -> String {
        let suffix: u32 = rand::thread_rng().gen_range(0..1000);
        format!("{}-{}-{:03}", prefix, on.format("%Y%m%d"), suffix)
    }
}

/// Monotonic per-process suffix; collision-free until the counter wraps at
/// 1000, so the retry loop effectively never fires. Used by tests and suited
/// to single-writer deployments.
#[derive(Debug, Default)]
pub struct SequentialNumberGenerator {
    counter: AtomicU32,
}

impl ReferenceNumberGenerator for SequentialNumberGenerator {
    fn generate(&self, prefix: &str, on: DateTime<Utc>) -> String {
        let suffix = self.counter.fetch_add(1, Ordering::Relaxed) % 1000;
        format!("{}-{}-{:03}", prefix, on.format("%Y%m%d"), suffix)
    }
}
