// Piano performance sync engine
//
// Plays a recorded piano performance in lockstep with its MIDI data.
// The audio track is the playback clock; MIDI events are stretched onto it and
// drive per-key and sustain-pedal animations.
// Uses lock-free command queues, cpal for audio output, and symphonia for decoding.

pub mod audio;
pub mod command;
pub mod config;
pub mod error;
pub mod io;

// Re-export commonly used types
pub use audio::{
    AudioAnalysis, FrameAngles, LoadedPerformance, PerformanceTimeline, PlaybackScheduler,
    Player, PlayerController, SchedulerState,
};
pub use command::{Command, PlayerEvent};
pub use config::{SyncSettings, TrackCatalog, TrackEntry};
pub use error::{Result, SyncError};
pub use io::AudioFile;
