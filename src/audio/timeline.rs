use crate::audio::midi::{EventKind, TimedEvent};
use crate::audio::sentinel::{filter_sentinel_notes, SentinelReport};
use crate::audio::tempo::TempoMap;
use crate::error::ParseError;
use crate::io::midi_file::decode_smf;

/// A performance's MIDI side: time-ordered events plus the alignment figures
/// derived from them.
///
/// Events are sorted ascending by `time_ms`, ties in file order (part order for
/// merged performances). After construction the only mutation is the sentinel
/// filter's removal pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceTimeline {
    events: Vec<TimedEvent>,
    ticks_per_quarter: u16,
    tempo_map: TempoMap,
    /// Earliest note on (after sentinel filtering, once run)
    first_note_on_ms: f64,
    /// Last note off minus first note on, or 0 if there is no such span
    active_duration_ms: f64,
    /// Times of sustain presses, ascending, for pedal lookahead
    sustain_press_times: Vec<f64>,
    sentinels_filtered: bool,
    sentinel_report: SentinelReport,
    /// Number of part files that went into this timeline
    part_count: usize,
}

impl PerformanceTimeline {
    /// Build a timeline from already-resolved events and their tempo map
    pub fn new(mut events: Vec<TimedEvent>, tempo_map: TempoMap) -> Self {
        // Stable sort keeps file order for simultaneous events
        events.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));
        let mut timeline = Self {
            events,
            ticks_per_quarter: tempo_map.ticks_per_quarter(),
            tempo_map,
            first_note_on_ms: 0.0,
            active_duration_ms: 0.0,
            sustain_press_times: Vec::new(),
            sentinels_filtered: false,
            sentinel_report: SentinelReport::default(),
            part_count: 1,
        };
        timeline.recompute_span();
        timeline
    }

    /// Decode one SMF buffer and resolve its ticks through its own tempo map.
    /// The result is not yet sentinel-filtered.
    pub fn from_smf(bytes: &[u8]) -> Result<Self, ParseError> {
        let decoded = decode_smf(bytes)?;
        let tempo_map = TempoMap::build(decoded.ticks_per_quarter, &decoded.tempo_changes);
        log::debug!("Tempo map: {} segments", tempo_map.segments().len());

        let events = decoded
            .events
            .into_iter()
            .map(|e| e.at_ms(tempo_map.tick_to_ms(e.tick)))
            .collect();
        Ok(Self::new(events, tempo_map))
    }

    /// Merge independently parsed part files into one timeline.
    ///
    /// Parts that failed (to fetch or to parse) are skipped with a warning. The
    /// first successful part supplies the tempo map and ticks-per-quarter; later
    /// parts are assumed to share its tempo. Zero successful parts is an error.
    pub fn merge_parts<E: std::fmt::Display>(
        parts: Vec<Result<Vec<u8>, E>>,
    ) -> Result<Self, ParseError> {
        let total = parts.len();
        let mut primary: Option<TempoMap> = None;
        let mut all_events = Vec::new();
        let mut merged = 0usize;

        for (idx, part) in parts.into_iter().enumerate() {
            let bytes = match part {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("MIDI part {} unavailable: {}", idx, e);
                    continue;
                }
            };
            match Self::from_smf(&bytes) {
                Ok(timeline) => {
                    if primary.is_none() {
                        primary = Some(timeline.tempo_map);
                    }
                    all_events.extend(timeline.events);
                    merged += 1;
                }
                Err(e) => log::warn!("MIDI part {} failed to parse: {}", idx, e),
            }
        }

        let tempo_map = primary.ok_or(ParseError::NoTracks)?;
        let mut timeline = Self::new(all_events, tempo_map);
        timeline.part_count = merged;
        log::info!(
            "MIDI merged from {} of {} files; events: {}",
            merged,
            total,
            timeline.events.len()
        );
        Ok(timeline)
    }

    /// Remove start/end sentinel notes and recompute the alignment figures.
    /// Only the first call filters; later calls are no-ops.
    pub fn filter_sentinels(&mut self) -> &SentinelReport {
        if !self.sentinels_filtered {
            self.sentinel_report = filter_sentinel_notes(&mut self.events);
            self.sentinels_filtered = true;
            if self.sentinel_report.removed_pairs > 0 {
                log::debug!("Filtered {} sentinel notes", self.sentinel_report.removed_pairs);
            }
            self.recompute_span();
        }
        &self.sentinel_report
    }

    /// Recompute first note on, active span and the sustain press index
    pub fn recompute_span(&mut self) {
        self.first_note_on_ms = self
            .events
            .iter()
            .find(|e| e.is_note_on())
            .map(|e| e.time_ms)
            .unwrap_or(0.0);

        let has_note_on = self.events.iter().any(|e| e.is_note_on());
        let last_off = self
            .events
            .iter()
            .rev()
            .find(|e| e.is_note_off())
            .map(|e| e.time_ms);

        self.active_duration_ms = match last_off {
            Some(last_off) if has_note_on && last_off > self.first_note_on_ms => {
                last_off - self.first_note_on_ms
            }
            _ => 0.0,
        };

        self.sustain_press_times = self
            .events
            .iter()
            .filter(|e| e.is_sustain_press())
            .map(|e| e.time_ms)
            .collect();
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    pub fn first_note_on_ms(&self) -> f64 {
        self.first_note_on_ms
    }

    pub fn active_duration_ms(&self) -> f64 {
        self.active_duration_ms
    }

    pub fn sentinel_report(&self) -> &SentinelReport {
        &self.sentinel_report
    }

    pub fn part_count(&self) -> usize {
        self.part_count
    }

    /// Time of the first sustain press strictly after `time_ms`
    pub fn next_sustain_press_after(&self, time_ms: f64) -> Option<f64> {
        let idx = self.sustain_press_times.partition_point(|&t| t <= time_ms);
        self.sustain_press_times.get(idx).copied()
    }

    /// Distinct note numbers referenced by note events
    pub fn notes_used(&self) -> Vec<u8> {
        let mut used = [false; 128];
        for event in &self.events {
            if let EventKind::NoteOn { note, .. } | EventKind::NoteOff { note, .. } = event.kind {
                used[(note & 0x7F) as usize] = true;
            }
        }
        (0u8..128).filter(|&n| used[n as usize]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::midi::RawEvent;

    fn on(ms: f64, note: u8, velocity: u8) -> TimedEvent {
        RawEvent::note_on(0, 0, note, velocity).at_ms(ms)
    }

    fn off(ms: f64, note: u8) -> TimedEvent {
        RawEvent::note_off(0, 0, note, 0).at_ms(ms)
    }

    #[test]
    fn test_span_and_first_note() {
        let timeline = PerformanceTimeline::new(
            vec![off(900.0, 60), on(100.0, 60, 80), on(400.0, 64, 80), off(700.0, 64)],
            TempoMap::constant(480),
        );
        assert_eq!(timeline.first_note_on_ms(), 100.0);
        assert_eq!(timeline.active_duration_ms(), 800.0);
        let times: Vec<f64> = timeline.events().iter().map(|e| e.time_ms).collect();
        assert_eq!(times, vec![100.0, 400.0, 700.0, 900.0]);
    }

    #[test]
    fn test_first_note_at_zero_still_has_span() {
        let timeline = PerformanceTimeline::new(
            vec![on(0.0, 60, 80), off(500.0, 60)],
            TempoMap::constant(480),
        );
        assert_eq!(timeline.active_duration_ms(), 500.0);
    }

    #[test]
    fn test_no_notes_has_zero_span() {
        let timeline = PerformanceTimeline::new(
            vec![RawEvent::sustain(0, 0, 127).at_ms(10.0)],
            TempoMap::constant(480),
        );
        assert_eq!(timeline.first_note_on_ms(), 0.0);
        assert_eq!(timeline.active_duration_ms(), 0.0);
        assert_eq!(timeline.next_sustain_press_after(0.0), Some(10.0));
        assert_eq!(timeline.next_sustain_press_after(10.0), None);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let timeline = PerformanceTimeline::new(
            vec![off(100.0, 60), on(100.0, 60, 90), on(50.0, 60, 90)],
            TempoMap::constant(480),
        );
        let kinds: Vec<bool> = timeline.events().iter().map(|e| e.is_note_on()).collect();
        assert_eq!(kinds, vec![true, false, true]);
    }

    #[test]
    fn test_merge_with_all_parts_failed() {
        let parts: Vec<Result<Vec<u8>, String>> =
            vec![Err("HTTP 404".to_string()), Ok(b"garbage".to_vec())];
        assert_eq!(
            PerformanceTimeline::merge_parts(parts),
            Err(ParseError::NoTracks)
        );
    }

    #[test]
    fn test_notes_used() {
        let timeline = PerformanceTimeline::new(
            vec![on(0.0, 64, 80), on(1.0, 60, 80), off(2.0, 64)],
            TempoMap::constant(480),
        );
        assert_eq!(timeline.notes_used(), vec![60, 64]);
    }
}
