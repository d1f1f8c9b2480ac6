use crate::audio::midi::{EventKind, TimedEvent};
use std::collections::{HashMap, VecDeque};

/// Sentinel notes are at most this loud
pub const SENTINEL_VELOCITY_MAX: u8 = 8;
/// ...and at most this long
pub const SENTINEL_DURATION_MAX_MS: f64 = 120.0;

/// Outcome of one sentinel filter pass
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SentinelReport {
    /// Note pairs removed (0, 1 or 2)
    pub removed_pairs: usize,
    /// Start times of the removed notes
    pub removed_at_ms: Vec<f64>,
}

/// A note on matched with its note off
#[derive(Debug, Clone, Copy, PartialEq)]
struct NotePair {
    on_index: usize,
    off_index: usize,
    on_ms: f64,
    off_ms: f64,
    velocity: u8,
}

impl NotePair {
    fn duration_ms(&self) -> f64 {
        self.off_ms - self.on_ms
    }

    fn is_sentinel(&self) -> bool {
        self.velocity <= SENTINEL_VELOCITY_MAX && self.duration_ms() <= SENTINEL_DURATION_MAX_MS
    }
}

/// Pair note ons with note offs, first-in first-out per (channel, note).
/// Unmatched events are left out.
fn pair_notes(events: &[TimedEvent]) -> Vec<NotePair> {
    let mut open: HashMap<(u8, u8), VecDeque<usize>> = HashMap::new();
    let mut pairs = Vec::new();

    for (idx, event) in events.iter().enumerate() {
        match event.kind {
            EventKind::NoteOn { note, .. } => {
                open.entry((event.channel, note)).or_default().push_back(idx);
            }
            EventKind::NoteOff { note, .. } => {
                let Some(on_index) = open
                    .get_mut(&(event.channel, note))
                    .and_then(|queue| queue.pop_front())
                else {
                    continue;
                };
                let on = &events[on_index];
                pairs.push(NotePair {
                    on_index,
                    off_index: idx,
                    on_ms: on.time_ms,
                    off_ms: event.time_ms,
                    velocity: on.velocity().unwrap_or(0),
                });
            }
            EventKind::ControllerSustain { .. } => {}
        }
    }

    pairs
}

/// Remove a near-silent marker note at the very start and/or end.
///
/// Only the earliest-starting and the latest-ending pair are candidates; interior
/// notes are never touched even if they are quiet and short. Events must be
/// sorted by time.
///
/// A single pass is not idempotent: once a marker is gone, the next edge note
/// becomes a candidate. Run it once per timeline through
/// `PerformanceTimeline::filter_sentinels`, which records that it has run.
pub(crate) fn filter_sentinel_notes(events: &mut Vec<TimedEvent>) -> SentinelReport {
    let pairs = pair_notes(events);
    let mut report = SentinelReport::default();

    // First pair with the minimal start and first pair with the maximal end
    let earliest = pairs
        .iter()
        .copied()
        .reduce(|best, p| if p.on_ms < best.on_ms { p } else { best });
    let latest = pairs
        .iter()
        .copied()
        .reduce(|best, p| if p.off_ms > best.off_ms { p } else { best });

    let mut candidates = Vec::with_capacity(2);
    candidates.extend(earliest);
    if let Some(latest) = latest {
        if Some(latest) != earliest {
            candidates.push(latest);
        }
    }

    let mut remove = Vec::new();
    for pair in candidates {
        if pair.is_sentinel() {
            remove.push(pair.on_index);
            remove.push(pair.off_index);
            report.removed_pairs += 1;
            report.removed_at_ms.push(pair.on_ms);
        }
    }

    if !remove.is_empty() {
        remove.sort_unstable();
        let mut idx = 0;
        events.retain(|_| {
            let keep = remove.binary_search(&idx).is_err();
            idx += 1;
            keep
        });
    }

    report
}
