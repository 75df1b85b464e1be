//! Interval algebra over sorted, internally non-overlapping interval lists.
//!
//! Every list taken or returned by this module is sorted ascending by start and
//! contains no two intervals that overlap. Intervals are half-open `[start, end)`,
//! so touching intervals (`a.end == b.start`) never overlap and are never merged.
//! Zero-length intervals cannot be constructed, and the operations here never
//! emit one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};

/// A non-empty half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawInterval> for Interval {
    type Error = BookingError;

    fn try_from(raw: RawInterval) -> Result<Self> {
        Interval::new(raw.start, raw.end)
    }
}

impl Interval {
    /// Build an interval, rejecting `end <= start`.
    ///
    /// # Errors
    /// Returns `BookingError::InvalidInput` for empty or inverted ranges.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(BookingError::invalid(format!(
                "interval end {end} must be after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Callers guarantee `end > start`.
    pub(crate) fn from_bounds_unchecked(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(end > start, "empty interval {start}..{end}");
        Self { start, end }
    }

    /// `[start, end)` when it is non-empty.
    fn spanning(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Restrict this interval to `[from, to)`; `None` when nothing remains.
    pub fn clamp(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<Interval> {
        Self::spanning(self.start.max(from), self.end.min(to))
    }
}

/// Remove every point covered by `busy` from `available`.
///
/// A single cursor into `busy` is shared across all `available` intervals, so the
/// whole walk costs O(n + m).
pub fn subtract(available: &[Interval], busy: &[Interval]) -> Vec<Interval> {
    let mut free = Vec::new();
    let mut j = 0;

    for a in available {
        // Skip busy intervals that end before this available interval starts.
        while j < busy.len() && busy[j].end <= a.start {
            j += 1;
        }

        let mut cursor = a.start;
        for b in busy[j..].iter().take_while(|b| b.start < a.end) {
            if b.start > cursor {
                free.push(Interval::from_bounds_unchecked(cursor, b.start.min(a.end)));
            }
            cursor = cursor.max(b.end);
            if cursor >= a.end {
                break;
            }
        }

        if cursor < a.end {
            free.push(Interval::from_bounds_unchecked(cursor, a.end));
        }
    }

    free
}

/// Points present in both `a` and `b`.
pub fn intersect_two(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        let (x, y) = (&a[i], &b[j]);
        if let Some(common) = Interval::spanning(x.start.max(y.start), x.end.min(y.end)) {
            out.push(common);
        }
        // Retire whichever interval ends first; on a tie both are spent and
        // advancing either yields the same result.
        if x.end < y.end {
            i += 1;
        } else {
            j += 1;
        }
    }

    out
}

/// Points present in every list. Empty input yields an empty result, and the fold
/// stops as soon as the running intersection is empty.
pub fn intersect_all(lists: &[Vec<Interval>]) -> Vec<Interval> {
    let Some((first, rest)) = lists.split_first() else {
        return Vec::new();
    };
    if lists.iter().any(Vec::is_empty) {
        return Vec::new();
    }

    let mut acc = first.clone();
    for list in rest {
        acc = intersect_two(&acc, list);
        if acc.is_empty() {
            break;
        }
    }
    acc
}
