use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetentionPolicy {
    #[default]
    Disabled,
    RetainMinSegments(usize), // Keep at least N segments, active one included
    RetainTotalSize(u64),     // Keep total log size under X bytes (approx)
    RetainDuration(Duration), // Keep segments modified within X duration
}

/// What retention needs to know about a sealed segment.
#[derive(Debug, Clone, Copy)]
pub struct SealedSegment {
    pub size_bytes: u64,
    pub last_modified: SystemTime,
}

impl RetentionPolicy {
    /// How many of the oldest sealed segments (ordered oldest first) should be
    /// deleted. The active segment is never a candidate.
    pub fn expired_count(&self, sealed: &[SealedSegment], active_bytes: u64, now: SystemTime) -> usize {
        match *self {
            RetentionPolicy::Disabled => 0,
            RetentionPolicy::RetainMinSegments(keep) => {
                let total = sealed.len() + 1;
                total.saturating_sub(keep.max(1)).min(sealed.len())
            }
            RetentionPolicy::RetainTotalSize(limit) => {
                let mut total: u64 = active_bytes + sealed.iter().map(|s| s.size_bytes).sum::<u64>();
                let mut count = 0;
                for segment in sealed {
                    if total <= limit {
                        break;
                    }
                    total -= segment.size_bytes;
                    count += 1;
                }
                count
            }
            RetentionPolicy::RetainDuration(max_age) => sealed
                .iter()
                .take_while(|s| {
                    now.duration_since(s.last_modified)
                        .map_or(false, |age| age > max_age)
                })
                .count(),
        }
    }
}
