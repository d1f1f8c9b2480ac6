use crate::audio::analysis::AnalysisConfig;
use crate::audio::animation::KeyGeometry;
use crate::error::{ConfigError, SchedulingError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest accepted audio/MIDI offset either way
pub const MAX_SYNC_OFFSET_MS: i32 = 3000;
/// Clamp an offset to ±[`MAX_SYNC_OFFSET_MS`]
pub fn clamp_sync_offset(offset_ms: i32) -> i32 {
    offset_ms.clamp(-MAX_SYNC_OFFSET_MS, MAX_SYNC_OFFSET_MS)
}

/// Check a playback rate is usable
pub fn validate_playback_rate(rate: f64) -> Result<f64, SchedulingError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(SchedulingError::InvalidPlaybackRate(rate))
    }
}

/// Playback and alignment settings (persistent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Positive delays audio relative to MIDI, negative delays MIDI
    pub sync_offset_ms: i32,
    pub playback_rate: f64,
    /// Passed to the audio backend; scheduling ignores it
    pub preserve_pitch_on_rate_change: bool,
    /// Scheduling lead for a fresh start
    pub lead_time_sec: f64,
    /// Scheduling lead when resuming from pause
    pub resume_lead_sec: f64,
    pub geometry: KeyGeometry,
    pub analysis: AnalysisConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_offset_ms: 0,
            playback_rate: 1.0,
            preserve_pitch_on_rate_change: true,
            lead_time_sec: 0.2,
            resume_lead_sec: 0.05,
            geometry: KeyGeometry::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl SyncSettings {
    /// Load settings from the standard location.
    /// Returns defaults if the file doesn't exist or is malformed.
    pub fn load() -> Self {
        match Self::config_path().and_then(|path| Self::try_load_from(&path)) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Failed to load settings, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Load settings from a specific file; a missing file yields defaults
    pub fn try_load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: SyncSettings = serde_json::from_str(&contents)?;
        Ok(settings.normalized())
    }

    /// Save settings to the standard location.
    /// Logs the error but doesn't block if the save fails.
    pub fn save(&self) {
        if let Err(e) = Self::config_path().and_then(|path| self.try_save_to(&path)) {
            log::warn!("Failed to save settings: {}", e);
        }
    }

    /// Save atomically (write to temp, then rename)
    pub fn try_save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(temp_path, path)?;

        Ok(())
    }

    /// Cross-platform settings file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        use directories::ProjectDirs;

        let proj_dirs = ProjectDirs::from("", "", "pianosync").ok_or(ConfigError::NoConfigDir)?;

        Ok(proj_dirs.config_dir().join("settings.json"))
    }

    /// Bring hand-edited values back into range
    pub fn normalized(mut self) -> Self {
        self.sync_offset_ms = clamp_sync_offset(self.sync_offset_ms);
        if validate_playback_rate(self.playback_rate).is_err() {
            log::warn!("Ignoring invalid playback rate {}", self.playback_rate);
            self.playback_rate = 1.0;
        }
        self.lead_time_sec = self.lead_time_sec.max(0.0);
        self.resume_lead_sec = self.resume_lead_sec.max(0.0);
        self
    }

    pub fn set_sync_offset_ms(&mut self, offset_ms: i32) {
        self.sync_offset_ms = clamp_sync_offset(offset_ms);
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<(), SchedulingError> {
        self.playback_rate = validate_playback_rate(rate)?;
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// One selectable performance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEntry {
    pub key: String,
    #[serde(default)]
    pub label: String,
    /// Audio sources to try in order (e.g. a WAV, then an MP3)
    #[serde(default)]
    pub audio_candidates: Vec<String>,
    /// MIDI part files merged into one timeline
    #[serde(default)]
    pub midi_parts: Vec<String>,
    /// Off for exports whose audio is already aligned with the MIDI
    #[serde(default = "default_true")]
    pub trim_leading_silence: bool,
}

impl TrackEntry {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
            audio_candidates: Vec::new(),
            midi_parts: Vec::new(),
            trim_leading_silence: true,
        }
    }

    pub fn with_audio(mut self, candidate: impl Into<String>) -> Self {
        self.audio_candidates.push(candidate.into());
        self
    }

    pub fn with_midi_part(mut self, part: impl Into<String>) -> Self {
        self.midi_parts.push(part.into());
        self
    }
}

/// The list of performances a host can switch between
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackCatalog {
    #[serde(default)]
    pub tracks: Vec<TrackEntry>,
}

impl TrackCatalog {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn find(&self, key: &str) -> Result<&TrackEntry, ConfigError> {
        self.tracks
            .iter()
            .find(|t| t.key == key)
            .ok_or_else(|| ConfigError::UnknownTrack(key.to_string()))
    }
}
