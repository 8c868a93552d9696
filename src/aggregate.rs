use crate::model::{AggregateResult, BandwidthSnapshot};

/// Folds one snapshot into the running per-bucket result.
///
/// Index 0 seeds the result verbatim. Later snapshots average pairwise with
/// the stored value, so the newest sample always carries half the weight.
/// Buckets first seen after the seed are ignored for the rest of the cycle.
pub fn fold(result: &mut AggregateResult, index: usize, snapshot: BandwidthSnapshot) {
    if index == 0 {
        result.extend(snapshot.buckets);
        return;
    }
    for (bucket, sample) in snapshot.buckets {
        if let Some(stored) = result.get_mut(&bucket) {
            stored.current = (stored.current + sample.current) / 2.0;
            stored.limit = ((stored.limit as u128 + sample.limit as u128) / 2) as u64;
        }
    }
}

/// Running fold over one cycle, tracking the snapshot index.
#[derive(Debug, Default)]
pub struct Aggregator {
    result: AggregateResult,
    folded: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: BandwidthSnapshot) {
        fold(&mut self.result, self.folded, snapshot);
        self.folded += 1;
    }

    pub fn folded(&self) -> usize {
        self.folded
    }

    pub fn finish(self) -> AggregateResult {
        self.result
    }
}
