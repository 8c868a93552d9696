use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Number of snapshots folded into one displayed cycle.
pub const WINDOW_SIZE: usize = 10;

/// Per-bucket figures, both as reported by the server and as aggregated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketStat {
    #[serde(rename = "limitInBytesPerSecond", default)]
    pub limit: u64,
    #[serde(rename = "currentBandwidthInBytesPerSecond", default)]
    pub current: f64,
}

impl BucketStat {
    pub fn new(limit: u64, current: f64) -> Self {
        Self { limit, current }
    }
}

/// One measurement tick from a server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BandwidthSnapshot {
    #[serde(rename = "bucketStats", default)]
    pub buckets: HashMap<String, BucketStat>,
}

impl BandwidthSnapshot {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, BucketStat)>,
        S: Into<String>,
    {
        Self {
            buckets: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Output of one cycle. Iteration order carries no meaning.
pub type AggregateResult = HashMap<String, BucketStat>;

/// Read-only inputs shared by every cycle of one invocation.
#[derive(Clone, Debug)]
pub struct CycleContext {
    pub server: String,
    pub buckets: Vec<String>,
    window: usize,
}

impl CycleContext {
    pub fn new(server: impl Into<String>, buckets: Vec<String>) -> Self {
        Self {
            server: server.into(),
            buckets,
            window: WINDOW_SIZE,
        }
    }

    /// Snapshots per cycle; always `WINDOW_SIZE`.
    pub fn window(&self) -> usize {
        self.window
    }
}
