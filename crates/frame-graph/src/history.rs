use std::collections::VecDeque;
use std::time::Duration;

use marker_loc_core::{Iso3, Stamp};

#[derive(Clone, Debug)]
pub(crate) struct Sample {
    pub stamp: Stamp,
    pub pose: Iso3,
}

/// Stored transform for one parent->child link.
#[derive(Clone, Debug)]
pub(crate) enum EdgeHistory {
    /// Authored transform, valid at any query time.
    Static(Iso3),
    /// Stamped samples in ascending stamp order, bounded by the retention
    /// window measured back from the newest sample.
    Dynamic(VecDeque<Sample>),
}

/// What sampling one edge at one stamp produced.
pub(crate) enum SampleOutcome {
    Found(Iso3),
    /// No usable sample yet; a future insertion may still provide one.
    Waitable,
    /// The requested stamp lies before the retained window. No future
    /// insertion can satisfy it, so waiting is pointless.
    Expired,
}

impl EdgeHistory {
    pub fn dynamic(stamp: Stamp, pose: Iso3) -> Self {
        let mut samples = VecDeque::with_capacity(8);
        samples.push_back(Sample { stamp, pose });
        EdgeHistory::Dynamic(samples)
    }

    /// Record a dynamic sample.
    ///
    /// A sample at an already-stored stamp replaces the stored value; other
    /// stamps are kept as history. Samples older than the retention window
    /// (relative to the newest stamp) are evicted.
    pub fn push(&mut self, stamp: Stamp, pose: Iso3, retention: Duration) {
        let samples = match self {
            EdgeHistory::Dynamic(samples) => samples,
            EdgeHistory::Static(_) => {
                *self = EdgeHistory::dynamic(stamp, pose);
                return;
            }
        };

        let at = samples.partition_point(|s| s.stamp < stamp);
        if samples.get(at).is_some_and(|s| s.stamp == stamp) {
            samples[at].pose = pose;
        } else {
            samples.insert(at, Sample { stamp, pose });
        }

        if let Some(newest) = samples.back().map(|s| s.stamp) {
            let horizon = newest.saturating_sub(retention);
            while samples.front().is_some_and(|s| s.stamp < horizon) {
                samples.pop_front();
            }
        }
    }

    /// Sample the edge at `stamp`.
    ///
    /// Dynamic edges resolve to the most recent sample at or before the
    /// requested stamp, provided it is no staler than the retention window;
    /// [`Stamp::LATEST`] selects the newest sample unconditionally.
    pub fn sample(&self, stamp: Stamp, retention: Duration) -> SampleOutcome {
        let samples = match self {
            EdgeHistory::Static(pose) => return SampleOutcome::Found(*pose),
            EdgeHistory::Dynamic(samples) => samples,
        };
        let Some(newest) = samples.back() else {
            return SampleOutcome::Waitable;
        };
        if stamp.is_latest() {
            return SampleOutcome::Found(newest.pose);
        }
        if stamp < newest.stamp.saturating_sub(retention) {
            return SampleOutcome::Expired;
        }
        if stamp > newest.stamp.advanced(retention) {
            // Newest data is too stale for this query; wait for fresher input.
            return SampleOutcome::Waitable;
        }
        let at = samples.partition_point(|s| s.stamp <= stamp);
        match at.checked_sub(1).and_then(|i| samples.get(i)) {
            Some(s) => SampleOutcome::Found(s.pose),
            None => SampleOutcome::Waitable,
        }
    }
}
