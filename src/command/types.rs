use crate::audio::loader::{LoadStatus, LoadedPerformance};
use crate::audio::scheduler::SchedulerState;

/// Commands sent from the host/UI thread to the player
#[derive(Debug, Clone)]
pub enum Command {
    // Transport commands
    /// Start from the beginning, or resume if paused
    Play,
    /// Pause playback (keeps the playhead)
    Pause,
    /// Pause if playing, otherwise play
    TogglePlayPause,
    /// Stop playback and reset to the beginning
    Stop,
    /// Stop and start again from the beginning
    Restart,

    // Settings
    /// Change the playback rate (> 0)
    SetPlaybackRate(f64),
    /// Change the audio/MIDI offset in ms (applies on next start/resume)
    SetSyncOffset(i32),

    // Loading
    /// A track switch began; playback stops and controls are disabled
    BeginLoad(String),
    /// A load finished (successfully or not)
    LoadPerformance(Box<LoadedPerformance>),
}

/// Events sent from the player back to the host/UI thread
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Current MIDI clock position in milliseconds
    PlaybackPosition(f64),
    /// Transport state changed
    StateChanged(SchedulerState),
    /// Audio reached its end; everything was reset
    PlaybackFinished,
    /// Audio failed mid-playback; everything was reset
    AudioError(String),
    /// Start/resume was refused and can be retried
    SchedulingFailed(String),
    /// MIDI and audio load status
    LoadStatusChanged { midi: LoadStatus, audio: LoadStatus },
    /// Events dispatched during the last frame
    EventsDispatched(usize),
}
