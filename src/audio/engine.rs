use crate::audio::loader::{LoadStatus, LoadedPerformance};
use crate::audio::scheduler::{FrameAngles, PlaybackScheduler, SchedulerState};
use crate::audio::output::OutputNotice;
use crate::command::{Command, PlayerEvent};
use crate::error::SchedulingError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Frame loop around the playback scheduler.
///
/// The host calls [`Player::process_frame`] once per rendered frame; it drains
/// pending commands, checks the audio backend, dispatches due MIDI events and
/// returns the angles to draw.
pub struct Player {
    scheduler: PlaybackScheduler,
    track_key: Option<String>,
    midi_status: LoadStatus,
    audio_status: LoadStatus,

    // Lock-free communication
    command_rx: rtrb::Consumer<Command>,
    event_tx: rtrb::Producer<PlayerEvent>,

    // Shared MIDI clock position (f64 bits) for host reads
    position_atomic: Arc<AtomicU64>,

    // Frame counter for periodic position updates
    frames_since_last_event: usize,
    event_interval_frames: usize,

    last_state: SchedulerState,
}

impl Player {
    /// Create a new Player with communication channels
    pub fn new(
        scheduler: PlaybackScheduler,
        command_rx: rtrb::Consumer<Command>,
        event_tx: rtrb::Producer<PlayerEvent>,
    ) -> Self {
        let last_state = scheduler.state();
        Self {
            scheduler,
            track_key: None,
            midi_status: LoadStatus::Idle,
            audio_status: LoadStatus::Idle,
            command_rx,
            event_tx,
            position_atomic: Arc::new(AtomicU64::new(0f64.to_bits())),
            frames_since_last_event: 0,
            // Roughly 10 position updates per second at 60 fps
            event_interval_frames: 6,
            last_state,
        }
    }

    /// Get a handle for controlling playback from the host thread
    pub fn get_controller(&self, command_tx: rtrb::Producer<Command>) -> PlayerController {
        PlayerController {
            command_tx,
            position: Arc::clone(&self.position_atomic),
        }
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn track_key(&self) -> Option<&str> {
        self.track_key.as_deref()
    }

    pub fn midi_status(&self) -> &LoadStatus {
        &self.midi_status
    }

    pub fn audio_status(&self) -> &LoadStatus {
        &self.audio_status
    }

    /// Playback controls are enabled only when both halves loaded
    pub fn can_play(&self) -> bool {
        self.midi_status.is_ready() && self.audio_status.is_ready()
    }

    /// Run one frame - called from the host's render loop
    pub fn process_frame(&mut self) -> FrameAngles {
        // Process all pending commands
        while let Ok(cmd) = self.command_rx.pop() {
            self.handle_command(cmd);
        }

        // Audio end or failure resets everything
        if let Some(notice) = self.scheduler.poll_output() {
            let event = match notice {
                OutputNotice::Ended => PlayerEvent::PlaybackFinished,
                OutputNotice::Error(e) => PlayerEvent::AudioError(e),
            };
            self.send(event);
        }

        let dispatched = self.scheduler.advance();
        if !dispatched.is_empty() {
            self.send(PlayerEvent::EventsDispatched(dispatched.len()));
        }

        let frame = self.scheduler.frame();
        self.position_atomic
            .store(frame.elapsed_ms.to_bits(), Ordering::Relaxed);

        if self.scheduler.state() == SchedulerState::Playing {
            self.frames_since_last_event += 1;
            if self.frames_since_last_event >= self.event_interval_frames {
                self.send(PlayerEvent::PlaybackPosition(frame.elapsed_ms));
                self.frames_since_last_event = 0;
            }
        }

        self.report_state();
        frame
    }

    /// Handle a command from the host thread
    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play => {
                let result = match self.scheduler.state() {
                    SchedulerState::Playing => Ok(()),
                    SchedulerState::Paused => self.guarded(|s| s.resume()),
                    _ => self.guarded(|s| s.toggle()),
                };
                self.report_failure(result);
            }
            Command::Pause => {
                self.scheduler.pause();
            }
            Command::TogglePlayPause => {
                let result = self.guarded(|s| s.toggle());
                self.report_failure(result);
            }
            Command::Stop => {
                self.scheduler.stop();
            }
            Command::Restart => {
                let result = self.guarded(|s| s.restart());
                self.report_failure(result);
            }
            Command::SetPlaybackRate(rate) => {
                let result = self.scheduler.set_playback_rate(rate);
                self.report_failure(result);
            }
            Command::SetSyncOffset(offset_ms) => {
                self.scheduler.set_sync_offset_ms(offset_ms);
            }
            Command::BeginLoad(key) => {
                log::info!("Switching to track {}", key);
                self.scheduler.unload();
                self.track_key = Some(key);
                self.set_status(LoadStatus::Loading, LoadStatus::Loading);
            }
            Command::LoadPerformance(loaded) => {
                self.install(*loaded);
            }
        }
    }

    /// Install a finished load, replacing whatever was playing
    pub fn install(&mut self, loaded: LoadedPerformance) {
        let LoadedPerformance {
            key,
            timeline,
            audio,
            analysis,
            midi_status,
            audio_status,
            ..
        } = loaded;

        match timeline {
            Some(timeline) => {
                self.scheduler.load(timeline, analysis);
                self.scheduler.set_audio_source(audio);
            }
            None => self.scheduler.unload(),
        }
        self.track_key = Some(key);
        self.set_status(midi_status, audio_status);
    }

    /// Transport actions are ignored until both halves are ready
    fn guarded(
        &mut self,
        action: impl FnOnce(&mut PlaybackScheduler) -> Result<(), SchedulingError>,
    ) -> Result<(), SchedulingError> {
        if !self.can_play() {
            log::debug!("Ignoring transport command: performance not ready");
            return Ok(());
        }
        action(&mut self.scheduler)
    }

    fn report_failure(&mut self, result: Result<(), SchedulingError>) {
        if let Err(e) = result {
            self.send(PlayerEvent::SchedulingFailed(e.to_string()));
        }
    }

    fn set_status(&mut self, midi: LoadStatus, audio: LoadStatus) {
        self.midi_status = midi.clone();
        self.audio_status = audio.clone();
        self.send(PlayerEvent::LoadStatusChanged { midi, audio });
    }

    fn report_state(&mut self) {
        let state = self.scheduler.state();
        if state != self.last_state {
            self.last_state = state;
            self.frames_since_last_event = 0;
            self.send(PlayerEvent::StateChanged(state));
        }
    }

    fn send(&mut self, event: PlayerEvent) {
        if self.event_tx.push(event).is_err() {
            log::debug!("Player event queue full, dropping event");
        }
    }
}

/// Controller for the player that can be used from the host/UI thread
pub struct PlayerController {
    command_tx: rtrb::Producer<Command>,
    position: Arc<AtomicU64>,
}

impl PlayerController {
    /// Start or resume playback
    pub fn play(&mut self) {
        let _ = self.command_tx.push(Command::Play);
    }

    /// Pause playback
    pub fn pause(&mut self) {
        let _ = self.command_tx.push(Command::Pause);
    }

    pub fn toggle_play_pause(&mut self) {
        let _ = self.command_tx.push(Command::TogglePlayPause);
    }

    /// Stop playback and reset to beginning
    pub fn stop(&mut self) {
        let _ = self.command_tx.push(Command::Stop);
    }

    pub fn restart(&mut self) {
        let _ = self.command_tx.push(Command::Restart);
    }

    pub fn set_playback_rate(&mut self, rate: f64) {
        let _ = self.command_tx.push(Command::SetPlaybackRate(rate));
    }

    pub fn set_sync_offset(&mut self, offset_ms: i32) {
        let _ = self.command_tx.push(Command::SetSyncOffset(offset_ms));
    }

    /// Announce a track switch; playback stops until the load arrives
    pub fn begin_load(&mut self, key: impl Into<String>) {
        let _ = self.command_tx.push(Command::BeginLoad(key.into()));
    }

    pub fn load_performance(&mut self, loaded: LoadedPerformance) {
        let _ = self
            .command_tx
            .push(Command::LoadPerformance(Box::new(loaded)));
    }

    /// MIDI clock position as of the last processed frame
    pub fn position_ms(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::analysis::AudioAnalysis;
    use crate::audio::clock::ManualClock;
    use crate::audio::midi::RawEvent;
    use crate::audio::output::{NullOutput, SilentVoices};
    use crate::audio::tempo::TempoMap;
    use crate::audio::timeline::PerformanceTimeline;
    use crate::config::SyncSettings;

    fn player(clock: &ManualClock) -> (Player, PlayerController, rtrb::Consumer<PlayerEvent>) {
        let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(64);
        let (event_tx, event_rx) = rtrb::RingBuffer::<PlayerEvent>::new(256);
        let scheduler = PlaybackScheduler::new(
            Box::new(clock.clone()),
            Box::new(NullOutput::new()),
            Box::new(SilentVoices),
            SyncSettings::default(),
        );
        let player = Player::new(scheduler, command_rx, event_tx);
        let controller = player.get_controller(command_tx);
        (player, controller, event_rx)
    }

    fn loaded(audio_ready: bool) -> LoadedPerformance {
        let timeline = PerformanceTimeline::new(
            vec![
                RawEvent::note_on(0, 0, 60, 100).at_ms(0.0),
                RawEvent::note_off(0, 0, 60, 0).at_ms(500.0),
            ],
            TempoMap::constant(480),
        );
        LoadedPerformance {
            key: "test".to_string(),
            timeline: Some(timeline),
            audio: None,
            analysis: audio_ready.then(|| AudioAnalysis {
                active_duration_ms: 500.0,
                total_ms: 500.0,
                ..AudioAnalysis::default()
            }),
            audio_location: None,
            midi_status: LoadStatus::Ready,
            audio_status: if audio_ready {
                LoadStatus::Ready
            } else {
                LoadStatus::Error("HTTP 404".to_string())
            },
        }
    }

    fn drain(rx: &mut rtrb::Consumer<PlayerEvent>) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.pop() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_play_after_load() {
        let clock = ManualClock::new(0.0);
        let (mut player, mut controller, mut events) = player(&clock);

        controller.begin_load("test");
        controller.load_performance(loaded(true));
        controller.play();
        player.process_frame();
        assert!(player.can_play());
        assert_eq!(player.scheduler().state(), SchedulerState::Playing);

        clock.set(0.25);
        player.process_frame();
        assert!((controller.position_ms() - 50.0).abs() < 1e-6);

        // Key press is under way 30ms later
        clock.set(0.28);
        let frame = player.process_frame();
        assert!(frame.keys.iter().any(|&(note, angle)| note == 60 && angle > 0.0));

        let events = drain(&mut events);
        assert!(events.contains(&PlayerEvent::StateChanged(SchedulerState::Playing)));
        assert!(events.contains(&PlayerEvent::EventsDispatched(1)));
    }

    #[test]
    fn test_audio_error_disables_playback() {
        let clock = ManualClock::new(0.0);
        let (mut player, mut controller, mut events) = player(&clock);

        controller.load_performance(loaded(false));
        controller.play();
        player.process_frame();
        assert!(!player.can_play());
        assert!(player.audio_status().is_error());
        assert_eq!(player.scheduler().state(), SchedulerState::Stopped);

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            PlayerEvent::LoadStatusChanged { audio: LoadStatus::Error(_), .. }
        )));
    }

    #[test]
    fn test_toggle_pause_and_resume() {
        let clock = ManualClock::new(0.0);
        let (mut player, mut controller, _events) = player(&clock);
        controller.load_performance(loaded(true));
        controller.toggle_play_pause();
        player.process_frame();

        clock.set(0.3);
        player.process_frame();
        controller.toggle_play_pause();
        player.process_frame();
        assert_eq!(player.scheduler().state(), SchedulerState::Paused);
        assert!(player.scheduler().sync_state().saved_playhead_ms > 0.0);

        controller.toggle_play_pause();
        player.process_frame();
        assert_eq!(player.scheduler().state(), SchedulerState::Playing);
    }
}
