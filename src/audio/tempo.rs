/// Default tempo: 120 BPM (500000 microseconds per quarter note)
pub const DEFAULT_MICROSECONDS_PER_QUARTER: u32 = 500_000;

/// A set-tempo meta event at an absolute tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TempoChange {
    pub tick: u32,
    pub microseconds_per_quarter: u32,
}

/// One constant-tempo stretch of the timeline.
///
/// `start_time_ms` is the cumulative time at `start_tick`, computed under the
/// previous segment's tempo.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TempoSegment {
    pub start_tick: u32,
    pub start_time_ms: f64,
    pub microseconds_per_quarter: u32,
}

impl TempoSegment {
    fn ms_per_tick(&self, ticks_per_quarter: u16) -> f64 {
        self.microseconds_per_quarter as f64 / ticks_per_quarter as f64 / 1000.0
    }
}

/// Piecewise tick -> millisecond mapping built from a file's tempo changes
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TempoMap {
    ticks_per_quarter: u16,
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    /// Build the segment table. Changes are sorted by tick (stable, so several
    /// changes on one tick resolve to the last one in file order).
    pub fn build(ticks_per_quarter: u16, changes: &[TempoChange]) -> Self {
        let ticks_per_quarter = ticks_per_quarter.max(1);
        let mut sorted = changes.to_vec();
        sorted.sort_by_key(|c| c.tick);

        let mut segments = vec![TempoSegment {
            start_tick: 0,
            start_time_ms: 0.0,
            microseconds_per_quarter: DEFAULT_MICROSECONDS_PER_QUARTER,
        }];

        for change in sorted {
            // segments is never empty: it starts with the default entry
            let last = segments[segments.len() - 1];
            if change.tick == last.start_tick {
                // Same tick: the later change wins, start time is unchanged
                let idx = segments.len() - 1;
                segments[idx].microseconds_per_quarter = change.microseconds_per_quarter;
                continue;
            }

            let delta_ticks = (change.tick - last.start_tick) as f64;
            let start_time_ms = last.start_time_ms + delta_ticks * last.ms_per_tick(ticks_per_quarter);
            segments.push(TempoSegment {
                start_tick: change.tick,
                start_time_ms,
                microseconds_per_quarter: change.microseconds_per_quarter,
            });
        }

        Self {
            ticks_per_quarter,
            segments,
        }
    }

    /// A map with no tempo changes (constant 120 BPM)
    pub fn constant(ticks_per_quarter: u16) -> Self {
        Self::build(ticks_per_quarter, &[])
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }

    pub fn segments(&self) -> &[TempoSegment] {
        &self.segments
    }

    /// Index of the last segment starting at or before `tick`
    fn segment_index(&self, tick: u32) -> usize {
        // First segment starts at tick 0, so the partition point is always >= 1
        self.segments
            .partition_point(|s| s.start_tick <= tick)
            .saturating_sub(1)
    }

    /// Convert an absolute tick to milliseconds
    pub fn tick_to_ms(&self, tick: u32) -> f64 {
        let seg = &self.segments[self.segment_index(tick)];
        seg.start_time_ms + (tick - seg.start_tick) as f64 * seg.ms_per_tick(self.ticks_per_quarter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_changes_is_120_bpm() {
        let map = TempoMap::constant(480);
        assert_eq!(map.segments().len(), 1);
        assert_eq!(map.tick_to_ms(0), 0.0);
        assert_eq!(map.tick_to_ms(480), 500.0);
        assert_eq!(map.tick_to_ms(960), 1000.0);
    }

    #[test]
    fn test_tempo_change_at_480() {
        let map = TempoMap::build(
            480,
            &[TempoChange {
                tick: 480,
                microseconds_per_quarter: 300_000,
            }],
        );
        assert_eq!(map.segments().len(), 2);
        assert_eq!(map.segments()[1].start_time_ms, 500.0);
        assert!((map.tick_to_ms(960) - 800.0).abs() < 1e-9);
        assert!((map.tick_to_ms(240) - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_at_tick_zero_replaces_default() {
        let map = TempoMap::build(
            96,
            &[
                TempoChange {
                    tick: 0,
                    microseconds_per_quarter: 600_000,
                },
                TempoChange {
                    tick: 0,
                    microseconds_per_quarter: 400_000,
                },
            ],
        );
        assert_eq!(map.segments().len(), 1);
        assert_eq!(map.segments()[0].microseconds_per_quarter, 400_000);
        assert!((map.tick_to_ms(96) - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_unsorted_changes_are_sorted() {
        let map = TempoMap::build(
            480,
            &[
                TempoChange {
                    tick: 960,
                    microseconds_per_quarter: 1_000_000,
                },
                TempoChange {
                    tick: 480,
                    microseconds_per_quarter: 250_000,
                },
            ],
        );
        let starts: Vec<u32> = map.segments().iter().map(|s| s.start_tick).collect();
        assert_eq!(starts, vec![0, 480, 960]);
        // 500ms + 480 ticks at 250000us/q = 750ms
        assert!((map.tick_to_ms(960) - 750.0).abs() < 1e-9);
        assert!((map.tick_to_ms(1440) - 1750.0).abs() < 1e-9);
    }

    #[test]
    fn test_mapping_is_monotonic() {
        let map = TempoMap::build(
            120,
            &[
                TempoChange {
                    tick: 100,
                    microseconds_per_quarter: 200_000,
                },
                TempoChange {
                    tick: 350,
                    microseconds_per_quarter: 1_500_000,
                },
                TempoChange {
                    tick: 351,
                    microseconds_per_quarter: 1,
                },
                TempoChange {
                    tick: 2000,
                    microseconds_per_quarter: 700_000,
                },
            ],
        );
        let mut previous = map.tick_to_ms(0);
        for tick in 1..5000 {
            let ms = map.tick_to_ms(tick);
            assert!(ms >= previous, "tick {} went backwards: {} < {}", tick, ms, previous);
            previous = ms;
        }
    }
}
