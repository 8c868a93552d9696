use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::trace;

use crate::aggregate::Aggregator;
use crate::model::{AggregateResult, CycleContext};
use crate::source::{Pull, SampleSource, SourceError};

#[derive(Debug)]
pub enum CycleOutcome {
    Complete {
        result: AggregateResult,
        folds: usize,
        /// The source ended before the window filled.
        exhausted: bool,
    },
    Cancelled,
}

/// Pulls up to `ctx.window()` snapshots and folds them in arrival order.
///
/// `poll` bounds how long a single pull may block before the stop flag is
/// looked at again. Once `stop` is observed no result is returned.
pub fn run_cycle<S: SampleSource + ?Sized>(
    source: &mut S,
    ctx: &CycleContext,
    stop: &AtomicBool,
    poll: Duration,
) -> Result<CycleOutcome, SourceError> {
    let mut agg = Aggregator::new();
    let mut exhausted = false;

    while agg.folded() < ctx.window() {
        if stop.load(Ordering::Relaxed) {
            return Ok(CycleOutcome::Cancelled);
        }
        match source.pull(poll)? {
            Pull::Snapshot(snapshot) => {
                trace!(index = agg.folded(), buckets = snapshot.buckets.len(), "Folding snapshot");
                agg.push(snapshot);
            }
            Pull::Idle => {}
            Pull::Exhausted => {
                exhausted = true;
                break;
            }
        }
    }

    if stop.load(Ordering::Relaxed) {
        return Ok(CycleOutcome::Cancelled);
    }
    let folds = agg.folded();
    Ok(CycleOutcome::Complete {
        result: agg.finish(),
        folds,
        exhausted,
    })
}
