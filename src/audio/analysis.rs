//! Leading/trailing silence and onset detection for a decoded performance
//!
//! The audio track is the playback clock, so the amount of silence before the
//! first audible note decides where in the buffer playback begins. Two
//! detectors run and the larger estimate wins: a windowed RMS scan and an
//! energy-flux onset detector that catches quiet attacks the RMS gate misses.

use crate::io::AudioFile;

/// Tunables for the silence/onset detectors
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// RMS scan window in samples
    pub window_samples: usize,
    /// RMS amplitude above which a window counts as audible
    pub rms_threshold: f32,
    /// Upper bound for any trim estimate
    pub max_trim_ms: f64,
    /// Onset detector frame size in samples
    pub onset_frame: usize,
    /// Onset detector hop size in samples
    pub onset_hop: usize,
    /// Number of previous flux values in the rolling baseline
    pub flux_window: usize,
    /// Z-score a flux value must exceed to count as an onset
    pub flux_z_threshold: f32,
    /// Onset frame energy must exceed this fraction of the peak frame energy
    pub min_energy_ratio: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_samples: 2048,
            rms_threshold: 0.0025,
            max_trim_ms: 20_000.0,
            onset_frame: 1024,
            onset_hop: 512,
            flux_window: 8,
            flux_z_threshold: 3.0,
            min_energy_ratio: 0.005,
        }
    }
}

/// Result of analysing one audio buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct AudioAnalysis {
    /// RMS-based leading silence estimate
    pub rms_leading_ms: f64,
    /// Onset-based leading silence estimate
    pub onset_ms: f64,
    /// Leading silence used as the playback buffer offset
    pub leading_silence_ms: f64,
    pub trailing_silence_ms: f64,
    pub total_ms: f64,
    /// Audible span between the trim point and the trailing silence
    pub active_duration_ms: f64,
}

impl AudioAnalysis {
    /// Run both detectors and derive the trim and active span.
    ///
    /// With `trim_leading` off the buffer is played from its start (for
    /// exports that are already aligned) and the active span is measured from 0.
    pub fn analyze(audio: &AudioFile, config: &AnalysisConfig, trim_leading: bool) -> Self {
        let rms_leading_ms = detect_leading_silence(audio, config);
        let onset_ms = detect_onset_by_energy(audio, config);
        let trailing_silence_ms = detect_trailing_silence(audio, config);
        let total_ms = audio.duration_ms();

        // Skip at least as much as either detector suggests
        let leading_silence_ms = if trim_leading {
            config.max_trim_ms.min(rms_leading_ms.max(0.0).max(onset_ms.max(0.0)))
        } else {
            0.0
        };

        let end_active_ms = leading_silence_ms.max(total_ms - trailing_silence_ms);
        let active_duration_ms = (end_active_ms - leading_silence_ms).max(0.0);

        log::debug!(
            "Audio analysis: rms {:.1}ms, onset {:.1}ms, trim {:.1}ms, trailing {:.1}ms, active {:.1}ms of {:.1}ms",
            rms_leading_ms,
            onset_ms,
            leading_silence_ms,
            trailing_silence_ms,
            active_duration_ms,
            total_ms
        );

        Self {
            rms_leading_ms,
            onset_ms,
            leading_silence_ms,
            trailing_silence_ms,
            total_ms,
            active_duration_ms,
        }
    }
}

fn samples_to_ms(samples: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    samples as f64 / sample_rate as f64 * 1000.0
}

fn rms(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = window.iter().map(|&s| s * s).sum();
    (sum_sq / window.len() as f32).sqrt()
}

/// Scan fixed windows of channel 0 from the start until one is audible
pub fn detect_leading_silence(audio: &AudioFile, config: &AnalysisConfig) -> f64 {
    let samples = audio.channel(0);
    let window_size = config.window_samples.max(1);
    let mut idx = 0;

    while idx < samples.len() {
        let end = (idx + window_size).min(samples.len());
        if rms(&samples[idx..end]) > config.rms_threshold {
            break;
        }
        idx = end;
        if samples_to_ms(idx, audio.sample_rate) > config.max_trim_ms {
            break;
        }
    }

    samples_to_ms(idx, audio.sample_rate).min(config.max_trim_ms)
}

/// Mirror of [`detect_leading_silence`], scanning back from the end
pub fn detect_trailing_silence(audio: &AudioFile, config: &AnalysisConfig) -> f64 {
    let samples = audio.channel(0);
    let len = samples.len();
    let window_size = config.window_samples.max(1);
    let mut idx = len;

    while idx > 0 {
        let start = idx.saturating_sub(window_size);
        if rms(&samples[start..idx]) > config.rms_threshold {
            break;
        }
        idx = start;
        if samples_to_ms(len - idx, audio.sample_rate) > config.max_trim_ms {
            break;
        }
    }

    samples_to_ms(len - idx, audio.sample_rate).min(config.max_trim_ms)
}

/// Short-time energy per frame of the (half-summed) first two channels
fn frame_energies(audio: &AudioFile, frame: usize, hop: usize) -> Vec<f32> {
    let len = audio.frames as usize;
    if len < frame || hop == 0 {
        return Vec::new();
    }
    let stereo = audio.channels > 1;
    let n = (len - frame) / hop;

    (0..n)
        .map(|i| {
            let offset = i * hop;
            let sum: f32 = (0..frame)
                .map(|k| {
                    let s0 = audio.sample(offset + k, 0);
                    let s1 = if stereo { audio.sample(offset + k, 1) } else { 0.0 };
                    let s = (s0 + s1) * 0.5;
                    s * s
                })
                .sum();
            sum / frame as f32
        })
        .collect()
}

/// Detect the first note onset from energy flux.
///
/// The onset is the first frame whose positive energy delta has a z-score
/// above the threshold against the preceding `flux_window` deltas, and whose
/// energy is not in the noise floor. Returns 0 when nothing qualifies.
pub fn detect_onset_by_energy(audio: &AudioFile, config: &AnalysisConfig) -> f64 {
    let frame = config.onset_frame.max(1);
    let hop = config.onset_hop.max(1);
    let energy = frame_energies(audio, frame, hop);
    if energy.is_empty() {
        return 0.0;
    }
    let max_energy = energy.iter().copied().fold(0.0f32, f32::max);

    // Only positive changes
    let mut flux = vec![0.0f32; energy.len()];
    for i in 1..energy.len() {
        flux[i] = (energy[i] - energy[i - 1]).max(0.0);
    }

    let win = config.flux_window.max(1);
    let mut onset_frame = 0;
    for i in win..flux.len() {
        let baseline = &flux[i - win..i];
        let mean = baseline.iter().sum::<f32>() / win as f32;
        let variance = baseline.iter().map(|f| (f - mean) * (f - mean)).sum::<f32>() / win as f32;
        let mut std = variance.sqrt();
        if std == 0.0 {
            std = 1e-6;
        }

        let z = (flux[i] - mean) / std;
        if z > config.flux_z_threshold && energy[i] > config.min_energy_ratio * max_energy {
            onset_frame = i;
            break;
        }
    }

    samples_to_ms(onset_frame * hop, audio.sample_rate).min(config.max_trim_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 8000;

    /// Mono buffer: silence, then a sine burst, then silence
    fn burst(silence_before: usize, tone: usize, silence_after: usize, amplitude: f32) -> AudioFile {
        let mut data = vec![0.0f32; silence_before];
        data.extend((0..tone).map(|i| {
            amplitude * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SR as f32).sin()
        }));
        data.extend(std::iter::repeat(0.0).take(silence_after));
        AudioFile::from_interleaved(data, 1, SR)
    }

    #[test]
    fn test_leading_silence_is_window_aligned() {
        // 4096 silent samples = two full windows = 512ms at 8 kHz
        let audio = burst(4096, 8000, 0, 0.5);
        let ms = detect_leading_silence(&audio, &AnalysisConfig::default());
        assert!((ms - 512.0).abs() < 1e-9, "got {}", ms);
    }

    #[test]
    fn test_trailing_silence_mirrors_leading() {
        let audio = burst(0, 8000, 4096, 0.5);
        let ms = detect_trailing_silence(&audio, &AnalysisConfig::default());
        assert!((ms - 512.0).abs() < 1e-9, "got {}", ms);
    }

    #[test]
    fn test_silent_file_is_capped() {
        let config = AnalysisConfig {
            max_trim_ms: 300.0,
            ..AnalysisConfig::default()
        };
        let audio = burst(8000, 0, 0, 0.0);
        assert_eq!(detect_leading_silence(&audio, &config), 300.0);
        assert_eq!(detect_trailing_silence(&audio, &config), 300.0);
    }

    #[test]
    fn test_onset_finds_attack_after_silence() {
        let audio = burst(8000, 8000, 0, 0.5);
        let ms = detect_onset_by_energy(&audio, &AnalysisConfig::default());
        // Attack at 1000ms; the first frame overlapping it starts at sample 7168
        assert!((ms - 896.0).abs() < 1e-9, "got {}", ms);
    }

    #[test]
    fn test_onset_of_short_buffer_is_zero() {
        let audio = burst(100, 100, 0, 0.5);
        assert_eq!(detect_onset_by_energy(&audio, &AnalysisConfig::default()), 0.0);
    }

    #[test]
    fn test_analyze_combines_estimates() {
        let audio = burst(8192, 16000, 8192, 0.5);
        let analysis = AudioAnalysis::analyze(&audio, &AnalysisConfig::default(), true);
        assert_eq!(
            analysis.leading_silence_ms,
            analysis.rms_leading_ms.max(analysis.onset_ms)
        );
        assert!((analysis.total_ms - 4048.0).abs() < 1e-9);
        let expected_active =
            (analysis.total_ms - analysis.trailing_silence_ms) - analysis.leading_silence_ms;
        assert!((analysis.active_duration_ms - expected_active).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_without_trim_measures_from_zero() {
        let audio = burst(8192, 16000, 0, 0.5);
        let analysis = AudioAnalysis::analyze(&audio, &AnalysisConfig::default(), false);
        assert_eq!(analysis.leading_silence_ms, 0.0);
        assert!(analysis.rms_leading_ms > 0.0);
        assert!((analysis.active_duration_ms - (analysis.total_ms - analysis.trailing_silence_ms)).abs() < 1e-9);
    }
}
