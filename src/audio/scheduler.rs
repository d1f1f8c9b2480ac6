use crate::audio::analysis::AudioAnalysis;
use crate::audio::animation::{NoteAnimationTable, PedalAnimState};
use crate::audio::clock::MonotonicClock;
use crate::audio::midi::{EventKind, TimedEvent, SUSTAIN_ON_THRESHOLD};
use crate::audio::output::{
    AudioOutput, AudioStart, InstrumentVoices, OutputNotice, VoiceHandle, VoiceOptions,
};
use crate::audio::stretch::compute_stretch;
use crate::audio::timeline::PerformanceTimeline;
use crate::config::{clamp_sync_offset, validate_playback_rate, SyncSettings};
use crate::error::SchedulingError;
use crate::io::AudioFile;
use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;

/// Lower bound for the playback rate divisor
const MIN_RATE: f64 = 1e-6;

/// Stretched, rate-scaled MIDI clock time of an event
fn due_ms(event: &TimedEvent, first_note_on_ms: f64, sync: &SyncState) -> f64 {
    first_note_on_ms
        + (event.time_ms - first_note_on_ms) * (sync.stretch_factor / sync.playback_rate.max(MIN_RATE))
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SchedulerState {
    Stopped,
    /// Start or resume requested; waiting for the audio backend
    Scheduled,
    Playing,
    Paused,
}

/// Clock alignment of the active performance
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SyncState {
    /// Clock time at which audio (re)started; `None` when not running
    pub audio_clock_origin_sec: Option<f64>,
    /// Clock time corresponding to MIDI time 0; `None` when not running
    pub midi_clock_origin_sec: Option<f64>,
    pub stretch_factor: f64,
    pub playback_rate: f64,
    /// Index of the next event to dispatch
    pub event_cursor: usize,
    /// Audio content played so far (ms past the trim point)
    pub saved_playhead_ms: f64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            audio_clock_origin_sec: None,
            midi_clock_origin_sec: None,
            stretch_factor: 1.0,
            playback_rate: 1.0,
            event_cursor: 0,
            saved_playhead_ms: 0.0,
        }
    }
}

/// Angles for one rendered frame
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FrameAngles {
    pub elapsed_ms: f64,
    /// (note, radians) for every key referenced so far
    pub keys: Vec<(u8, f64)>,
    pub pedal: f64,
}

/// Drives MIDI dispatch from the audio clock.
///
/// Audio is the authoritative clock: events are dispatched when the MIDI clock
/// (derived from the injected [`MonotonicClock`]) passes their stretched,
/// rate-scaled time. Dispatched events drive the key/pedal animations and,
/// when audible, the instrument voices.
pub struct PlaybackScheduler {
    clock: Box<dyn MonotonicClock>,
    output: Box<dyn AudioOutput>,
    voices: Box<dyn InstrumentVoices>,
    settings: SyncSettings,

    timeline: Option<PerformanceTimeline>,
    audio: Option<AudioAnalysis>,

    state: SchedulerState,
    sync: SyncState,
    keys: NoteAnimationTable,
    pedal: PedalAnimState,

    /// Sounding voices per (channel, note), oldest first
    voices_on: HashMap<(u8, u8), VecDeque<VoiceHandle>>,
    /// Voices whose note off arrived while the pedal was down
    sustained: Vec<VoiceHandle>,

    /// MIDI elapsed time of the last processed frame
    last_elapsed_ms: Option<f64>,
    /// MIDI time a resume restarts from; earlier frames are pre-roll
    resume_point_ms: Option<f64>,
    /// Frames dropped because of an unusable clock reading
    skipped_frames: usize,
}

impl PlaybackScheduler {
    pub fn new(
        clock: Box<dyn MonotonicClock>,
        output: Box<dyn AudioOutput>,
        voices: Box<dyn InstrumentVoices>,
        settings: SyncSettings,
    ) -> Self {
        let settings = settings.normalized();
        let sync = SyncState {
            playback_rate: settings.playback_rate,
            ..SyncState::default()
        };
        Self {
            clock,
            output,
            voices,
            keys: NoteAnimationTable::new(settings.geometry),
            settings,
            timeline: None,
            audio: None,
            state: SchedulerState::Stopped,
            sync,
            pedal: PedalAnimState::default(),
            voices_on: HashMap::new(),
            sustained: Vec::new(),
            last_elapsed_ms: None,
            resume_point_ms: None,
            skipped_frames: 0,
        }
    }

    /// Switch to a new performance. Any running playback is fully stopped.
    ///
    /// `audio` is `None` when the audio could not be loaded; such a
    /// performance can be inspected but not started.
    pub fn load(&mut self, timeline: PerformanceTimeline, audio: Option<AudioAnalysis>) {
        self.stop();
        self.sync.stretch_factor = match &audio {
            Some(analysis) => {
                compute_stretch(analysis.active_duration_ms, timeline.active_duration_ms())
            }
            None => 1.0,
        };
        log::info!(
            "Loaded performance: {} events, first note {:.1}ms, stretch {:.4}",
            timeline.len(),
            timeline.first_note_on_ms(),
            self.sync.stretch_factor
        );
        self.timeline = Some(timeline);
        self.audio = audio;
    }

    /// Give the audio output the PCM buffer of the loaded performance
    pub fn set_audio_source(&mut self, audio: Option<Arc<AudioFile>>) {
        self.output.set_source(audio);
    }

    /// Drop the performance (track switch to nothing)
    pub fn unload(&mut self) {
        self.stop();
        self.timeline = None;
        self.audio = None;
        self.output.set_source(None);
        self.sync.stretch_factor = 1.0;
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn timeline(&self) -> Option<&PerformanceTimeline> {
        self.timeline.as_ref()
    }

    pub fn audio_analysis(&self) -> Option<&AudioAnalysis> {
        self.audio.as_ref()
    }

    pub fn keys(&self) -> &NoteAnimationTable {
        &self.keys
    }

    pub fn pedal(&self) -> &PedalAnimState {
        &self.pedal
    }

    pub fn stretch_factor(&self) -> f64 {
        self.sync.stretch_factor
    }

    pub fn playback_rate(&self) -> f64 {
        self.sync.playback_rate
    }

    /// Frames skipped so far because the clock reading was unusable
    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames
    }

    /// Current MIDI clock position, if the clock is running
    pub fn elapsed_ms(&self) -> Option<f64> {
        self.sync
            .midi_clock_origin_sec
            .map(|origin| (self.clock.now() - origin) * 1000.0)
    }

    fn first_note_on_ms(&self) -> f64 {
        self.timeline
            .as_ref()
            .map(|t| t.first_note_on_ms())
            .unwrap_or(0.0)
    }

    fn trim_seconds(&self) -> f64 {
        self.audio
            .as_ref()
            .map(|a| a.leading_silence_ms / 1000.0)
            .unwrap_or(0.0)
    }

    /// When an event falls due on the MIDI clock
    pub fn scheduled_ms(&self, event: &TimedEvent) -> f64 {
        due_ms(event, self.first_note_on_ms(), &self.sync)
    }

    fn ensure_playable(&self) -> Result<(), SchedulingError> {
        if self.timeline.is_none() {
            return Err(SchedulingError::NotLoaded);
        }
        if self.audio.is_none() {
            return Err(SchedulingError::AudioUnavailable);
        }
        Ok(())
    }

    /// Start from the beginning, `lead_time_sec` from now.
    ///
    /// If the backend refuses, the scheduler stays `Scheduled` and the error
    /// is returned; call `start` again to retry.
    pub fn start(&mut self) -> Result<(), SchedulingError> {
        self.ensure_playable()?;
        self.stop();

        let now = self.clock.now();
        let offset_sec = self.settings.sync_offset_ms as f64 / 1000.0;
        let t0 = now + self.settings.lead_time_sec;
        let audio_start = t0 + offset_sec.max(0.0);
        let midi_zero = t0 + (-offset_sec).max(0.0);
        let midi_origin = midi_zero - self.first_note_on_ms() / 1000.0;

        self.sync.audio_clock_origin_sec = Some(audio_start);
        self.sync.midi_clock_origin_sec = Some(midi_origin);
        self.state = SchedulerState::Scheduled;

        log::info!(
            "Playback start: offset {}ms, t0 {:.3}, audio {:.3}, midi zero {:.3}",
            self.settings.sync_offset_ms,
            t0,
            audio_start,
            midi_zero
        );
        self.start_audio(audio_start, self.trim_seconds())
    }

    fn start_audio(&mut self, start_at: f64, buffer_offset: f64) -> Result<(), SchedulingError> {
        let request = AudioStart {
            start_at_seconds: start_at,
            buffer_offset_seconds: buffer_offset.max(0.0),
            playback_rate: self.sync.playback_rate,
            preserve_pitch: self.settings.preserve_pitch_on_rate_change,
        };
        match self.output.start(request) {
            Ok(()) => {
                self.state = SchedulerState::Playing;
                Ok(())
            }
            Err(e) => {
                log::warn!("Audio backend refused to start: {}", e);
                Err(e)
            }
        }
    }

    /// Dispatch every event due by now and update the animations.
    ///
    /// Returns the range of timeline indices dispatched by this call. Frames
    /// with an unusable clock reading are logged and skipped.
    pub fn advance(&mut self) -> Range<usize> {
        let cursor = self.sync.event_cursor;
        if self.state != SchedulerState::Playing {
            return cursor..cursor;
        }
        let Some(elapsed_ms) = self.elapsed_ms() else {
            return cursor..cursor;
        };

        if !elapsed_ms.is_finite() {
            log::warn!("Skipping frame: non-finite clock reading");
            self.skipped_frames += 1;
            return cursor..cursor;
        }
        if let Some(resume_ms) = self.resume_point_ms {
            // Still inside the resume lead: nothing is due yet
            if elapsed_ms < resume_ms {
                return cursor..cursor;
            }
            self.resume_point_ms = None;
        }
        if let Some(last) = self.last_elapsed_ms {
            if elapsed_ms < last {
                self.skipped_frames += 1;
                log::warn!(
                    "Skipping frame: clock went backwards ({:.3}ms < {:.3}ms)",
                    elapsed_ms,
                    last
                );
                return cursor..cursor;
            }
        }

        let range = self.dispatch_until(elapsed_ms, true);
        self.sample(elapsed_ms);
        range
    }

    /// Walk the cursor forward over every event due at `elapsed_ms`
    fn dispatch_until(&mut self, elapsed_ms: f64, audible: bool) -> Range<usize> {
        let start = self.sync.event_cursor;
        let Some(timeline) = self.timeline.take() else {
            return start..start;
        };

        let first = timeline.first_note_on_ms();
        let events = timeline.events();
        let mut cursor = start;
        while let Some(event) = events.get(cursor) {
            if due_ms(event, first, &self.sync) > elapsed_ms {
                break;
            }
            cursor += 1;
            self.dispatch(event, elapsed_ms, &timeline, audible);
        }

        self.sync.event_cursor = cursor;
        self.timeline = Some(timeline);
        start..cursor
    }

    fn dispatch(
        &mut self,
        event: &TimedEvent,
        now_ms: f64,
        timeline: &PerformanceTimeline,
        audible: bool,
    ) {
        let when_sec = self.clock.now();
        match event.kind {
            EventKind::NoteOn { note, velocity } => {
                self.keys.note_on(note, velocity, now_ms);
                if audible {
                    let options = VoiceOptions {
                        velocity,
                        channel: event.channel,
                    };
                    if let Some(handle) = self.voices.play(note, when_sec, options) {
                        self.voices_on
                            .entry((event.channel, note))
                            .or_default()
                            .push_back(handle);
                    }
                }
            }
            EventKind::NoteOff { note, .. } => {
                self.keys.note_off(note, now_ms);
                let handle = self
                    .voices_on
                    .get_mut(&(event.channel, note))
                    .and_then(|queue| queue.pop_front());
                if let Some(handle) = handle {
                    if self.pedal.is_engaged() {
                        self.sustained.push(handle);
                    } else {
                        self.voices.stop(handle, when_sec);
                    }
                }
            }
            EventKind::ControllerSustain { value } => {
                let geometry = *self.keys.geometry();
                if value >= SUSTAIN_ON_THRESHOLD {
                    self.pedal.press(now_ms, geometry.pedal_max_angle());
                } else {
                    let gap = timeline
                        .next_sustain_press_after(event.time_ms)
                        .map(|next| next - event.time_ms);
                    self.pedal
                        .release(now_ms, gap, geometry.pedal_bounce_angle());
                    // Pedal up releases everything it was holding
                    for handle in self.sustained.drain(..) {
                        self.voices.stop(handle, when_sec);
                    }
                }
            }
        }
    }

    /// Advance every animation to `elapsed_ms`
    fn sample(&mut self, elapsed_ms: f64) {
        self.keys.sample(elapsed_ms);
        self.pedal.sample(elapsed_ms);
        self.last_elapsed_ms = Some(elapsed_ms);
    }

    /// Angles for rendering the current frame
    pub fn frame(&self) -> FrameAngles {
        FrameAngles {
            elapsed_ms: self.elapsed_ms().or(self.last_elapsed_ms).unwrap_or(0.0),
            keys: self.keys.angles(),
            pedal: self.pedal.angle(),
        }
    }

    /// Freeze playback, remembering the audio position. Only valid while playing.
    pub fn pause(&mut self) -> bool {
        if self.state != SchedulerState::Playing {
            return false;
        }
        let now = self.clock.now();
        if let Some(audio_start) = self.sync.audio_clock_origin_sec {
            let played_ms = (now - audio_start) * self.sync.playback_rate * 1000.0;
            self.sync.saved_playhead_ms += played_ms.max(0.0);
        }
        // Animations stay where they were at the moment of pausing
        if let Some(elapsed) = self.elapsed_ms() {
            if elapsed.is_finite() && self.last_elapsed_ms.map_or(true, |last| elapsed >= last) {
                self.sample(elapsed);
            }
        }
        self.output.stop();
        self.release_all_voices(now);
        self.sync.audio_clock_origin_sec = None;
        self.sync.midi_clock_origin_sec = None;
        self.state = SchedulerState::Paused;
        log::info!("Paused at {:.1}ms of audio", self.sync.saved_playhead_ms);
        true
    }

    /// MIDI clock position that corresponds to the saved audio position
    fn resume_elapsed_ms(&self) -> f64 {
        self.first_note_on_ms()
            + self.sync.saved_playhead_ms / self.sync.playback_rate.max(MIN_RATE)
            + self.settings.sync_offset_ms as f64
    }

    /// Continue from the saved playhead, `resume_lead_sec` from now.
    ///
    /// The animations are rebuilt by replaying every event up to the playhead
    /// without sounding any voices.
    pub fn resume(&mut self) -> Result<(), SchedulingError> {
        self.ensure_playable()?;
        if !matches!(self.state, SchedulerState::Paused | SchedulerState::Scheduled) {
            return Ok(());
        }

        let now = self.clock.now();
        let t0 = now + self.settings.resume_lead_sec;
        let elapsed_ms = self.resume_elapsed_ms();

        self.sync.audio_clock_origin_sec = Some(t0);
        self.sync.midi_clock_origin_sec = Some(t0 - elapsed_ms / 1000.0);
        self.state = SchedulerState::Scheduled;

        // Visual-only catch-up from the top
        self.sync.event_cursor = 0;
        self.keys.reset();
        self.pedal.reset();
        self.last_elapsed_ms = None;
        let replayed = self.dispatch_until(elapsed_ms, false);
        self.sample(elapsed_ms);
        self.resume_point_ms = Some(elapsed_ms);
        log::info!(
            "Resuming at {:.1}ms (replayed {} events)",
            elapsed_ms,
            replayed.len()
        );

        let offset = self.trim_seconds() + self.sync.saved_playhead_ms / 1000.0;
        self.start_audio(t0, offset)
    }

    /// Play if stopped or paused, pause if playing
    pub fn toggle(&mut self) -> Result<(), SchedulingError> {
        match self.state {
            SchedulerState::Playing => {
                self.pause();
                Ok(())
            }
            _ if self.sync.saved_playhead_ms > 0.0 => self.resume(),
            _ => self.start(),
        }
    }

    /// Stop and start again from the beginning
    pub fn restart(&mut self) -> Result<(), SchedulingError> {
        self.ensure_playable()?;
        self.start()
    }

    /// Change speed; while playing this pauses and resumes at the new rate
    pub fn set_playback_rate(&mut self, rate: f64) -> Result<(), SchedulingError> {
        let rate = validate_playback_rate(rate)?;
        let was_playing = self.state == SchedulerState::Playing;
        if was_playing {
            self.pause();
        }
        self.sync.playback_rate = rate;
        self.settings.playback_rate = rate;
        log::info!("Playback rate {}", rate);
        if was_playing {
            self.resume()?;
        }
        Ok(())
    }

    /// Applies from the next start or resume
    pub fn set_sync_offset_ms(&mut self, offset_ms: i32) {
        self.settings.sync_offset_ms = clamp_sync_offset(offset_ms);
    }

    /// Full stop: audio off, cursor to 0, every animation back to rest
    pub fn stop(&mut self) {
        let now = self.clock.now();
        if self.state != SchedulerState::Stopped {
            self.output.stop();
            log::info!("Playback stopped");
        }
        self.release_all_voices(now);
        self.state = SchedulerState::Stopped;
        self.sync.audio_clock_origin_sec = None;
        self.sync.midi_clock_origin_sec = None;
        self.sync.event_cursor = 0;
        self.sync.saved_playhead_ms = 0.0;
        self.keys.reset();
        self.pedal.reset();
        self.last_elapsed_ms = None;
        self.resume_point_ms = None;
    }

    fn release_all_voices(&mut self, when_sec: f64) {
        for (_, queue) in self.voices_on.drain() {
            for handle in queue {
                self.voices.stop(handle, when_sec);
            }
        }
        for handle in self.sustained.drain(..) {
            self.voices.stop(handle, when_sec);
        }
    }

    /// Check the audio backend. End of buffer or a playback error stops
    /// everything and returns the notice.
    pub fn poll_output(&mut self) -> Option<OutputNotice> {
        let notice = self.output.poll()?;
        match &notice {
            OutputNotice::Ended => log::info!("Audio finished"),
            OutputNotice::Error(e) => log::error!("Audio playback failed: {}", e),
        }
        self.stop();
        Some(notice)
    }

    /// Whether every event has been dispatched
    pub fn is_finished(&self) -> bool {
        self.timeline
            .as_ref()
            .map_or(true, |t| self.sync.event_cursor >= t.len())
    }
}
