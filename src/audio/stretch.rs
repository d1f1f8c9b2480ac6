/// Maximum relative correction applied to MIDI timing
pub const STRETCH_CLAMP: f64 = 0.20;

/// Ratio of audio to MIDI active duration, clamped to `1 ± STRETCH_CLAMP`.
///
/// Returns 1.0 (no correction) when either duration is zero or unknown.
pub fn compute_stretch(audio_active_ms: f64, midi_active_ms: f64) -> f64 {
    if !(audio_active_ms > 0.0 && midi_active_ms > 0.0) {
        return 1.0;
    }
    let raw = audio_active_ms / midi_active_ms;
    if !raw.is_finite() {
        return 1.0;
    }
    log::debug!("Raw stretch audio/midi = {:.6}", raw);
    raw.clamp(1.0 - STRETCH_CLAMP, 1.0 + STRETCH_CLAMP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_drift_is_unclamped() {
        assert!((compute_stretch(9800.0, 10000.0) - 0.98).abs() < 1e-12);
    }

    #[test]
    fn test_large_drift_is_clamped() {
        assert_eq!(compute_stretch(20000.0, 10000.0), 1.2);
        assert_eq!(compute_stretch(1000.0, 10000.0), 0.8);
    }

    #[test]
    fn test_unknown_duration_means_no_correction() {
        assert_eq!(compute_stretch(0.0, 10000.0), 1.0);
        assert_eq!(compute_stretch(10000.0, 0.0), 1.0);
        assert_eq!(compute_stretch(f64::NAN, 10000.0), 1.0);
    }

    #[test]
    fn test_always_within_clamp() {
        let mut audio = 1.0;
        while audio < 1.0e7 {
            let mut midi = 1.0;
            while midi < 1.0e7 {
                let stretch = compute_stretch(audio, midi);
                assert!((0.8..=1.2).contains(&stretch), "{} / {} -> {}", audio, midi, stretch);
                midi *= 3.7;
            }
            audio *= 2.9;
        }
    }
}
