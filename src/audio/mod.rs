pub mod analysis;
pub mod animation;
pub mod clock;
pub mod engine;
pub mod loader;
pub mod midi;
pub mod output;
pub mod scheduler;
pub mod sentinel;
pub mod stretch;
pub mod tempo;
pub mod timeline;

pub use analysis::{AnalysisConfig, AudioAnalysis};
pub use animation::{KeyGeometry, NoteAnimationTable, PedalAnimState};
pub use clock::{ManualClock, MonotonicClock};
pub use engine::{Player, PlayerController};
pub use loader::{load_performance, LoadStatus, LoadedPerformance};
pub use midi::{EventKind, RawEvent, TimedEvent};
pub use output::{AudioOutput, AudioStart, InstrumentVoices, NullOutput, OutputNotice, SilentVoices};
pub use scheduler::{FrameAngles, PlaybackScheduler, SchedulerState, SyncState};
pub use sentinel::SentinelReport;
pub use stretch::compute_stretch;
pub use tempo::TempoMap;
pub use timeline::PerformanceTimeline;
