use crate::error::SchedulingError;
use crate::io::AudioFile;
use std::sync::Arc;

/// Instruction for the audio collaborator to begin playback
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct AudioStart {
    /// Clock time at which the first sample should sound
    pub start_at_seconds: f64,
    /// Position in the decoded buffer to start from (trim + saved playhead)
    pub buffer_offset_seconds: f64,
    pub playback_rate: f64,
    /// Whether the backend should keep pitch when the rate is not 1
    pub preserve_pitch: bool,
}

/// Something the audio collaborator reports back between frames
#[derive(Debug, Clone, PartialEq)]
pub enum OutputNotice {
    /// Buffer played to its end
    Ended,
    /// Playback failed mid-stream
    Error(String),
}

/// The device (or double) that plays the performance audio.
///
/// The scheduler only tells it when and where to start; the output owns the
/// buffer and the device.
pub trait AudioOutput {
    /// Hand over the decoded buffer to play; `None` releases it
    fn set_source(&mut self, _audio: Option<Arc<AudioFile>>) {}

    /// Schedule playback; a refusal leaves the scheduler waiting for a retry
    fn start(&mut self, request: AudioStart) -> Result<(), SchedulingError>;

    fn stop(&mut self);

    /// Drain one pending notice, if any
    fn poll(&mut self) -> Option<OutputNotice>;
}

/// Opaque handle to a sounding instrument voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceOptions {
    pub velocity: u8,
    pub channel: u8,
}

/// Instrument backend for audible note playback (SoundFont, synth, ...)
pub trait InstrumentVoices {
    fn play(&mut self, note: u8, when_sec: f64, options: VoiceOptions) -> Option<VoiceHandle>;

    fn stop(&mut self, handle: VoiceHandle, when_sec: f64);
}

/// Voice backend that makes no sound
#[derive(Debug, Default)]
pub struct SilentVoices;

impl InstrumentVoices for SilentVoices {
    fn play(&mut self, _note: u8, _when_sec: f64, _options: VoiceOptions) -> Option<VoiceHandle> {
        None
    }

    fn stop(&mut self, _handle: VoiceHandle, _when_sec: f64) {}
}

/// Audio output that accepts every request and never produces sound.
///
/// Used when a host wants the scheduler's timing without a device, e.g. for
/// simulations driven by a manual clock.
#[derive(Debug, Default)]
pub struct NullOutput {
    pub last_start: Option<AudioStart>,
    pub playing: bool,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for NullOutput {
    fn start(&mut self, request: AudioStart) -> Result<(), SchedulingError> {
        self.last_start = Some(request);
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn poll(&mut self) -> Option<OutputNotice> {
        None
    }
}
