#![allow(dead_code)]

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use pianosync::audio::output::{
    AudioOutput, AudioStart, InstrumentVoices, OutputNotice, VoiceHandle, VoiceOptions,
};
use pianosync::error::SchedulingError;
use pianosync::io::AudioFile;
use std::cell::{Cell, RefCell};
use std::io::Cursor;
use std::rc::Rc;
use std::sync::Arc;

/// One event of a fixture track, at an absolute tick (channel 0)
#[derive(Debug, Clone, Copy)]
pub enum Ev {
    On(u32, u8, u8),
    Off(u32, u8),
    Pedal(u32, u8),
    Tempo(u32, u32),
}

impl Ev {
    fn tick(&self) -> u32 {
        match *self {
            Ev::On(t, ..) | Ev::Off(t, _) | Ev::Pedal(t, _) | Ev::Tempo(t, _) => t,
        }
    }

    fn kind(&self) -> TrackEventKind<'static> {
        let midi = |message| TrackEventKind::Midi {
            channel: u4::new(0),
            message,
        };
        match *self {
            Ev::On(_, key, vel) => midi(MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(vel),
            }),
            Ev::Off(_, key) => midi(MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            }),
            Ev::Pedal(_, value) => midi(MidiMessage::Controller {
                controller: u7::new(64),
                value: u7::new(value),
            }),
            Ev::Tempo(_, us) => TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us))),
        }
    }
}

/// Write a Type 1 SMF with one track per slice entry
pub fn smf(ticks_per_quarter: u16, tracks: &[Vec<Ev>]) -> Vec<u8> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(ticks_per_quarter)),
    ));
    for track in tracks {
        let mut events = track.clone();
        events.sort_by_key(|e| e.tick());

        let mut last = 0;
        let mut out = Vec::new();
        for event in events {
            out.push(TrackEvent {
                delta: u28::new(event.tick() - last),
                kind: event.kind(),
            });
            last = event.tick();
        }
        out.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(out);
    }

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).expect("write SMF fixture");
    bytes
}

pub const WAV_RATE: u32 = 8000;

/// Mono samples: silence, a 440 Hz tone, silence
pub fn burst(silence_before: usize, tone: usize, silence_after: usize) -> Vec<f32> {
    let mut data = vec![0.0f32; silence_before];
    data.extend((0..tone).map(|i| {
        0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / WAV_RATE as f32).sin()
    }));
    data.extend(std::iter::repeat(0.0).take(silence_after));
    data
}

fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: WAV_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode mono samples as a 16-bit PCM WAV file in memory
pub fn wav_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut writer =
            hound::WavWriter::new(Cursor::new(&mut bytes), wav_spec()).expect("create WAV writer");
        for &s in samples {
            writer
                .write_sample((s * i16::MAX as f32) as i16)
                .expect("write WAV sample");
        }
        writer.finalize().expect("finalize WAV");
    }
    bytes
}

/// Write mono samples as a WAV file on disk
pub fn write_wav(path: &std::path::Path, samples: &[f32]) {
    let mut writer = hound::WavWriter::create(path, wav_spec()).expect("create WAV file");
    for &s in samples {
        writer
            .write_sample((s * i16::MAX as f32) as i16)
            .expect("write WAV sample");
    }
    writer.finalize().expect("finalize WAV");
}

/// What the scheduler asked of the audio output
#[derive(Debug, Default)]
pub struct OutputLog {
    pub starts: Vec<AudioStart>,
    pub stops: usize,
    pub has_source: bool,
    /// Refuse every start (e.g. no user gesture yet)
    pub refuse: bool,
    pub pending: Option<OutputNotice>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    pub log: Rc<RefCell<OutputLog>>,
}

impl AudioOutput for RecordingOutput {
    fn set_source(&mut self, audio: Option<Arc<AudioFile>>) {
        self.log.borrow_mut().has_source = audio.is_some();
    }

    fn start(&mut self, request: AudioStart) -> Result<(), SchedulingError> {
        let mut log = self.log.borrow_mut();
        if log.refuse {
            return Err(SchedulingError::BackendRefused("not allowed to start".to_string()));
        }
        log.starts.push(request);
        Ok(())
    }

    fn stop(&mut self) {
        self.log.borrow_mut().stops += 1;
    }

    fn poll(&mut self) -> Option<OutputNotice> {
        self.log.borrow_mut().pending.take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoiceCall {
    Play { note: u8, handle: u64, when: f64 },
    Stop { handle: u64, when: f64 },
}

#[derive(Debug, Clone, Default)]
pub struct RecordingVoices {
    pub calls: Rc<RefCell<Vec<VoiceCall>>>,
    next: Rc<Cell<u64>>,
}

impl RecordingVoices {
    pub fn played_notes(&self) -> Vec<u8> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                VoiceCall::Play { note, .. } => Some(*note),
                VoiceCall::Stop { .. } => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> Vec<u64> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                VoiceCall::Stop { handle, .. } => Some(*handle),
                VoiceCall::Play { .. } => None,
            })
            .collect()
    }
}

impl InstrumentVoices for RecordingVoices {
    fn play(&mut self, note: u8, when_sec: f64, _options: VoiceOptions) -> Option<VoiceHandle> {
        let handle = self.next.get();
        self.next.set(handle + 1);
        self.calls.borrow_mut().push(VoiceCall::Play {
            note,
            handle,
            when: when_sec,
        });
        Some(VoiceHandle(handle))
    }

    fn stop(&mut self, handle: VoiceHandle, when_sec: f64) {
        self.calls.borrow_mut().push(VoiceCall::Stop {
            handle: handle.0,
            when: when_sec,
        });
    }
}
