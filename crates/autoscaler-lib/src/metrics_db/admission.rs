//! Out-of-order write admission
//!
//! The store only appends at or after its watermark. Snapshots that arrive
//! slightly late (clock skew between reporting nodes) are moved forward to
//! the watermark; anything older than the grace window is dropped. So is a
//! snapshot whose readings cannot be stored as finite non-negative `f32`s.

use crate::models::{HostSnapshot, MetricSnapshot};

/// How far behind the watermark a snapshot may be and still be kept, in milliseconds
pub const GRACE_WINDOW_MILLIS: i64 = 60 * 1000;

/// What admitting a batch against a watermark produced
#[derive(Debug)]
pub(crate) struct Admission<'a> {
    /// Accepted entries with the timestamp they will be stored at, epoch millis
    pub rows: Vec<(i64, &'a HostSnapshot)>,
    /// Watermark after the batch commits
    pub watermark: i64,
    pub coerced: usize,
    pub dropped: usize,
}

/// Where a single timestamp lands relative to a watermark
pub(crate) fn adjust_if_recent(at: i64, watermark: i64) -> Option<i64> {
    if at >= watermark {
        Some(at)
    } else if at >= watermark - GRACE_WINDOW_MILLIS {
        Some(watermark)
    } else {
        None
    }
}

fn storable_reading(value: f64) -> bool {
    value.is_finite() && value >= 0.0 && value <= f64::from(f32::MAX)
}

/// Whether every reading of the snapshot fits its stored column
pub(crate) fn is_storable(snapshot: &MetricSnapshot) -> bool {
    [snapshot.cpu, snapshot.memory, snapshot.disk, snapshot.query_rate]
        .into_iter()
        .all(storable_reading)
}

pub(crate) fn admit(batch: &[HostSnapshot], watermark: i64) -> Admission<'_> {
    let mut admission = Admission {
        rows: Vec::with_capacity(batch.len()),
        watermark,
        coerced: 0,
        dropped: 0,
    };

    for entry in batch {
        if !is_storable(&entry.snapshot) {
            admission.dropped += 1;
            continue;
        }
        let at = entry.snapshot.at.timestamp_millis();
        match adjust_if_recent(at, admission.watermark) {
            Some(stored_at) => {
                if stored_at != at {
                    admission.coerced += 1;
                }
                admission.watermark = stored_at;
                admission.rows.push((stored_at, entry));
            }
            None => admission.dropped += 1,
        }
    }

    admission
}
