mod common;

use common::{smf, Ev};
use pianosync::audio::midi::EventKind;
use pianosync::audio::tempo::TempoMap;
use pianosync::audio::timeline::PerformanceTimeline;
use pianosync::error::ParseError;
use pianosync::io::decode_smf;

#[test]
fn test_tempo_change_between_tracks() {
    // Conductor track changes tempo at one beat; notes live on track 1
    let bytes = smf(
        480,
        &[
            vec![Ev::Tempo(480, 300_000)],
            vec![Ev::On(0, 60, 90), Ev::Off(480, 60), Ev::On(960, 62, 90), Ev::Off(1440, 62)],
        ],
    );
    let timeline = PerformanceTimeline::from_smf(&bytes).unwrap();

    let times: Vec<f64> = timeline.events().iter().map(|e| e.time_ms).collect();
    assert_eq!(times.len(), 4);
    assert!((times[0] - 0.0).abs() < 1e-9);
    assert!((times[1] - 500.0).abs() < 1e-9);
    assert!((times[2] - 800.0).abs() < 1e-9, "tick 960 at {}ms", times[2]);
    assert!((times[3] - 1100.0).abs() < 1e-9);
    assert_eq!(timeline.tempo_map().segments().len(), 2);
}

#[test]
fn test_decoder_reads_independent_encoder() {
    let bytes = smf(
        96,
        &[vec![
            Ev::Pedal(0, 127),
            Ev::On(0, 60, 100),
            Ev::On(10, 64, 0),
            Ev::Off(20, 60),
            Ev::Pedal(30, 0),
        ]],
    );
    let decoded = decode_smf(&bytes).unwrap();
    assert_eq!(decoded.format, 1);
    assert_eq!(decoded.ticks_per_quarter, 96);
    assert_eq!(decoded.tracks_decoded, 1);
    assert!(decoded.aborted.is_none());

    let kinds: Vec<EventKind> = decoded.events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.len(), 5);
    assert_eq!(kinds[0], EventKind::ControllerSustain { value: 127 });
    assert_eq!(kinds[1], EventKind::NoteOn { note: 60, velocity: 100 });
    // Velocity 0 note on is a note off
    assert!(matches!(kinds[2], EventKind::NoteOff { note: 64, .. }));
    assert!(matches!(kinds[3], EventKind::NoteOff { note: 60, .. }));
    assert_eq!(kinds[4], EventKind::ControllerSustain { value: 0 });
}

#[test]
fn test_tempo_mapping_is_monotonic() {
    let bytes = smf(
        480,
        &[vec![
            Ev::Tempo(0, 600_000),
            Ev::Tempo(700, 250_000),
            Ev::Tempo(1900, 1_000_000),
            Ev::Tempo(1900, 400_000),
            Ev::Tempo(3333, 90_000),
        ]],
    );
    let decoded = decode_smf(&bytes).unwrap();
    let map = TempoMap::build(decoded.ticks_per_quarter, &decoded.tempo_changes);

    let mut last = map.tick_to_ms(0);
    for tick in (1..6000).step_by(7) {
        let ms = map.tick_to_ms(tick);
        assert!(ms >= last, "tick {} went back: {} < {}", tick, ms, last);
        last = ms;
    }
}

#[test]
fn test_leading_sentinel_is_removed() {
    // 1 tick = 1ms at 120 bpm with 500 ticks per quarter
    let bytes = smf(
        500,
        &[vec![
            Ev::On(0, 21, 5),
            Ev::Off(80, 21),
            Ev::On(1000, 60, 80),
            Ev::Off(1500, 60),
            Ev::On(1200, 64, 70),
            Ev::Off(2000, 64),
        ]],
    );
    let mut timeline = PerformanceTimeline::from_smf(&bytes).unwrap();
    assert_eq!(timeline.first_note_on_ms(), 0.0);

    let report = timeline.filter_sentinels().clone();
    assert_eq!(report.removed_pairs, 1);
    assert_eq!(timeline.len(), 4);
    assert!((timeline.first_note_on_ms() - 1000.0).abs() < 1e-9);
    assert!((timeline.active_duration_ms() - 1000.0).abs() < 1e-9);
}

#[test]
fn test_sentinel_filter_keeps_interior_and_is_idempotent() {
    let bytes = smf(
        500,
        &[vec![
            Ev::On(0, 21, 4),
            Ev::Off(60, 21),
            Ev::On(1000, 60, 80),
            Ev::Off(1500, 60),
            // Interior note that also meets the thresholds
            Ev::On(1100, 30, 3),
            Ev::Off(1150, 30),
            Ev::On(2500, 108, 6),
            Ev::Off(2560, 108),
        ]],
    );
    let mut timeline = PerformanceTimeline::from_smf(&bytes).unwrap();
    assert_eq!(timeline.filter_sentinels().removed_pairs, 2);
    let once = timeline.clone();

    timeline.filter_sentinels();
    assert_eq!(timeline, once);

    let notes = timeline.notes_used();
    assert_eq!(notes, vec![30, 60]);
    assert!((timeline.active_duration_ms() - 500.0).abs() < 1e-9);
}

#[test]
fn test_merge_parts_keeps_first_tempo_and_skips_failures() {
    let left = smf(
        480,
        &[vec![Ev::Tempo(0, 300_000), Ev::On(480, 48, 70), Ev::Off(960, 48)]],
    );
    let right = smf(480, &[vec![Ev::On(0, 72, 70), Ev::Off(480, 72)]]);

    let parts: Vec<Result<Vec<u8>, String>> = vec![
        Ok(left),
        Err("HTTP 404".to_string()),
        Ok(b"garbage".to_vec()),
        Ok(right),
    ];
    let timeline = PerformanceTimeline::merge_parts(parts).unwrap();
    assert_eq!(timeline.part_count(), 2);
    assert_eq!(
        timeline.tempo_map().segments()[0].microseconds_per_quarter,
        300_000
    );

    // Each part resolved through its own tempo, then interleaved by time
    let times: Vec<f64> = timeline.events().iter().map(|e| e.time_ms).collect();
    assert_eq!(times, vec![0.0, 300.0, 500.0, 600.0]);
    assert_eq!(timeline.first_note_on_ms(), 0.0);
    assert!((timeline.active_duration_ms() - 600.0).abs() < 1e-9);
}

#[test]
fn test_merge_with_no_usable_part_fails() {
    let parts: Vec<Result<Vec<u8>, String>> = vec![Err("offline".to_string()), Ok(Vec::new())];
    assert_eq!(
        PerformanceTimeline::merge_parts(parts).unwrap_err(),
        ParseError::NoTracks
    );
}
