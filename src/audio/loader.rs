use crate::audio::analysis::{AnalysisConfig, AudioAnalysis};
use crate::audio::timeline::PerformanceTimeline;
use crate::config::TrackEntry;
use crate::error::{AudioDecodeError, FetchError, SyncError};
use crate::io::source::AssetSource;
use crate::io::AudioFile;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;

/// Load state of one half (MIDI or audio) of a performance
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Error(String),
}

impl LoadStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, LoadStatus::Ready)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LoadStatus::Error(_))
    }

    fn from_result<T>(result: &Result<T, SyncError>) -> Self {
        match result {
            Ok(_) => LoadStatus::Ready,
            Err(e) => LoadStatus::Error(e.to_string()),
        }
    }
}

/// Everything a track switch produced
#[derive(Debug, Clone)]
pub struct LoadedPerformance {
    pub key: String,
    pub timeline: Option<PerformanceTimeline>,
    pub audio: Option<Arc<AudioFile>>,
    pub analysis: Option<AudioAnalysis>,
    /// The audio candidate that was used
    pub audio_location: Option<String>,
    pub midi_status: LoadStatus,
    pub audio_status: LoadStatus,
}

impl LoadedPerformance {
    /// Playback needs both halves
    pub fn can_play(&self) -> bool {
        self.midi_status.is_ready() && self.audio_status.is_ready()
    }
}

/// Fetch MIDI part files concurrently and merge them into one filtered timeline
pub async fn load_midi_parts(
    source: &dyn AssetSource,
    parts: &[String],
) -> Result<PerformanceTimeline, SyncError> {
    if parts.is_empty() {
        return Err(FetchError::NotFound("no MIDI parts listed".to_string()).into());
    }

    let fetched = join_all(parts.iter().map(|part| source.fetch(part))).await;
    // Let the host's frame loop run before the CPU-bound parse
    tokio::task::yield_now().await;

    let mut timeline = PerformanceTimeline::merge_parts(fetched)?;
    timeline.filter_sentinels();
    Ok(timeline)
}

/// Try audio candidates in order; the first that fetches and decodes wins.
/// Decoding and analysis run on a blocking task.
pub async fn load_audio(
    source: &dyn AssetSource,
    candidates: &[String],
    config: &AnalysisConfig,
    trim_leading: bool,
) -> Result<(String, Arc<AudioFile>, AudioAnalysis), SyncError> {
    let mut failures = Vec::new();

    for candidate in candidates {
        let bytes = match source.fetch(candidate).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Audio candidate {} unavailable: {}", candidate, e);
                failures.push(format!("{}: {}", candidate, e));
                continue;
            }
        };

        let extension = Path::new(candidate)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_owned);
        let config = *config;
        let decoded = tokio::task::spawn_blocking(move || {
            let audio = AudioFile::load_from_bytes(bytes, extension.as_deref())?;
            let analysis = AudioAnalysis::analyze(&audio, &config, trim_leading);
            Ok::<_, AudioDecodeError>((audio, analysis))
        })
        .await;

        match decoded {
            Ok(Ok((audio, analysis))) => {
                log::info!(
                    "Using audio {} (trim {:.1}ms, active {:.1}ms)",
                    candidate,
                    analysis.leading_silence_ms,
                    analysis.active_duration_ms
                );
                return Ok((candidate.clone(), Arc::new(audio), analysis));
            }
            Ok(Err(e)) => {
                log::warn!("Audio candidate {} failed to decode: {}", candidate, e);
                failures.push(format!("{}: {}", candidate, e));
            }
            Err(e) => {
                log::warn!("Audio decode task for {} failed: {}", candidate, e);
                failures.push(format!("{}: {}", candidate, e));
            }
        }
    }

    Err(FetchError::AllCandidatesFailed(failures).into())
}

/// Load both halves of a catalog entry concurrently.
///
/// Never fails as a whole: each half reports its own status so the host can
/// show what went wrong.
pub async fn load_performance(
    source: &dyn AssetSource,
    entry: &TrackEntry,
    config: &AnalysisConfig,
) -> LoadedPerformance {
    log::info!("Loading track {}", entry.key);

    let (midi, audio) = futures::join!(
        load_midi_parts(source, &entry.midi_parts),
        load_audio(
            source,
            &entry.audio_candidates,
            config,
            entry.trim_leading_silence
        )
    );

    let midi_status = LoadStatus::from_result(&midi);
    let audio_status = LoadStatus::from_result(&audio);
    if let Err(e) = &midi {
        log::error!("MIDI load failed for {}: {}", entry.key, e);
    }
    if let Err(e) = &audio {
        log::error!("Audio load failed for {}: {}", entry.key, e);
    }

    let (audio_location, audio, analysis) = match audio {
        Ok((location, audio, analysis)) => (Some(location), Some(audio), Some(analysis)),
        Err(_) => (None, None, None),
    };

    LoadedPerformance {
        key: entry.key.clone(),
        timeline: midi.ok(),
        audio,
        analysis,
        audio_location,
        midi_status,
        audio_status,
    }
}
