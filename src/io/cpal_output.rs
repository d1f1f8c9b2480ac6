use crate::audio::clock::MonotonicClock;
use crate::audio::output::{AudioOutput, AudioStart, OutputNotice};
use crate::error::{DeviceError, SchedulingError};
use crate::io::AudioFile;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Clock driven by the number of frames the device has consumed.
///
/// Since the device pulls audio at its own pace, this is the clock the
/// audio is actually heard on.
#[derive(Debug, Clone)]
pub struct DeviceClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl DeviceClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl MonotonicClock for DeviceClock {
    fn now(&self) -> f64 {
        self.frames_rendered() as f64 / self.sample_rate as f64
    }
}

/// Messages from the control side to the audio callback
#[derive(Debug)]
enum OutputCommand {
    SetSource(Option<Arc<AudioFile>>),
    Start {
        start_at_seconds: f64,
        offset_seconds: f64,
        rate: f64,
    },
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    /// Device frame at which the first sample sounds
    start_frame: u64,
    /// Read position in source frames
    position: f64,
    /// Source frames per device frame
    step: f64,
}

/// State owned by the audio callback
struct Renderer {
    commands: rtrb::Consumer<OutputCommand>,
    notices: rtrb::Producer<OutputNotice>,
    clock: DeviceClock,
    channels: usize,
    source: Option<Arc<AudioFile>>,
    cursor: Option<Cursor>,
}

impl Renderer {
    fn new(
        commands: rtrb::Consumer<OutputCommand>,
        notices: rtrb::Producer<OutputNotice>,
        clock: DeviceClock,
        channels: usize,
    ) -> Self {
        Self {
            commands,
            notices,
            clock,
            channels: channels.max(1),
            source: None,
            cursor: None,
        }
    }

    fn handle_command(&mut self, cmd: OutputCommand) {
        match cmd {
            OutputCommand::SetSource(source) => {
                self.source = source;
                self.cursor = None;
            }
            OutputCommand::Start {
                start_at_seconds,
                offset_seconds,
                rate,
            } => {
                let Some(source) = &self.source else {
                    let _ = self
                        .notices
                        .push(OutputNotice::Error("no audio buffer".to_string()));
                    return;
                };
                let device_rate = self.clock.sample_rate as f64;
                self.cursor = Some(Cursor {
                    start_frame: (start_at_seconds.max(0.0) * device_rate).round() as u64,
                    position: offset_seconds.max(0.0) * source.sample_rate as f64,
                    step: rate * source.sample_rate as f64 / device_rate,
                });
            }
            OutputCommand::Stop => {
                self.cursor = None;
            }
        }
    }

    /// Fill one interleaved device buffer (already zeroed)
    fn render(&mut self, out: &mut [f32]) {
        while let Ok(cmd) = self.commands.pop() {
            self.handle_command(cmd);
        }

        let frames = out.len() / self.channels;
        let base = self.clock.frames_rendered();
        let mut ended = false;

        if let (Some(source), Some(cursor)) = (&self.source, &mut self.cursor) {
            let length = source.frames as f64;
            for (i, frame) in out.chunks_exact_mut(self.channels).enumerate() {
                if base + (i as u64) < cursor.start_frame {
                    continue;
                }
                if cursor.position >= length {
                    ended = true;
                    break;
                }

                // Linear interpolation between neighbouring source frames
                let index = cursor.position.floor() as usize;
                let frac = (cursor.position - index as f64) as f32;
                let next = (index + 1).min(source.frames.saturating_sub(1) as usize);
                for (channel, sample) in frame.iter_mut().enumerate() {
                    let a = source.sample(index, channel);
                    let b = source.sample(next, channel);
                    *sample = a + (b - a) * frac;
                }
                cursor.position += cursor.step;
            }
        }

        if ended {
            self.cursor = None;
            let _ = self.notices.push(OutputNotice::Ended);
        }
        self.clock.frames.fetch_add(frames as u64, Ordering::Relaxed);
    }
}

/// Plays the performance audio on the default output device via cpal
pub struct CpalAudioOutput {
    _stream: cpal::Stream,
    commands: rtrb::Producer<OutputCommand>,
    notices: rtrb::Consumer<OutputNotice>,
    errors: rtrb::Consumer<String>,
    clock: DeviceClock,
    has_source: bool,
}

impl CpalAudioOutput {
    /// Open the default output device and start its stream (silent until started)
    pub fn open() -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(DeviceError::NoOutputDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| DeviceError::Config(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        log::info!(
            "Output device: {} ({} Hz, {} channels, {:?})",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        let (command_tx, command_rx) = rtrb::RingBuffer::<OutputCommand>::new(64);
        let (notice_tx, notice_rx) = rtrb::RingBuffer::<OutputNotice>::new(16);
        let (error_tx, error_rx) = rtrb::RingBuffer::<String>::new(16);

        let clock = DeviceClock::new(config.sample_rate.0);
        let renderer = Renderer::new(
            command_rx,
            notice_tx,
            clock.clone(),
            config.channels as usize,
        );

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, renderer, error_tx),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, renderer, error_tx),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, renderer, error_tx),
            other => Err(DeviceError::UnsupportedFormat(format!("{:?}", other))),
        }?;
        stream
            .play()
            .map_err(|e| DeviceError::Play(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            commands: command_tx,
            notices: notice_rx,
            errors: error_rx,
            clock,
            has_source: false,
        })
    }

    /// The clock the device plays on; give this to the scheduler
    pub fn clock(&self) -> DeviceClock {
        self.clock.clone()
    }

    fn send(&mut self, cmd: OutputCommand) -> Result<(), SchedulingError> {
        self.commands
            .push(cmd)
            .map_err(|_| SchedulingError::BackendRefused("output command queue full".to_string()))
    }
}

impl AudioOutput for CpalAudioOutput {
    fn set_source(&mut self, audio: Option<Arc<AudioFile>>) {
        self.has_source = audio.is_some();
        if let Err(e) = self.send(OutputCommand::SetSource(audio)) {
            log::error!("Failed to hand audio to the output: {}", e);
        }
    }

    fn start(&mut self, request: AudioStart) -> Result<(), SchedulingError> {
        if !self.has_source {
            return Err(SchedulingError::BackendRefused("no audio buffer".to_string()));
        }
        if request.preserve_pitch && (request.playback_rate - 1.0).abs() > f64::EPSILON {
            log::debug!("Pitch preservation unavailable; resampling at {}x", request.playback_rate);
        }
        self.send(OutputCommand::Start {
            start_at_seconds: request.start_at_seconds,
            offset_seconds: request.buffer_offset_seconds,
            rate: request.playback_rate,
        })
    }

    fn stop(&mut self) {
        if let Err(e) = self.send(OutputCommand::Stop) {
            log::error!("Failed to stop output: {}", e);
        }
    }

    fn poll(&mut self) -> Option<OutputNotice> {
        if let Ok(error) = self.errors.pop() {
            return Some(OutputNotice::Error(error));
        }
        self.notices.pop().ok()
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
    mut error_tx: rtrb::Producer<String>,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let err_fn = move |err: cpal::StreamError| {
        log::error!("Audio stream error: {}", err);
        let _ = error_tx.push(err.to_string());
    };

    // Preallocated for typical device buffer sizes
    let mut conversion_buffer = vec![0.0f32; 16384];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if conversion_buffer.len() < data.len() {
                    conversion_buffer.resize(data.len(), 0.0);
                }
                let buffer_slice = &mut conversion_buffer[..data.len()];
                buffer_slice.fill(0.0);

                renderer.render(buffer_slice);

                for (sample, value) in data.iter_mut().zip(buffer_slice.iter()) {
                    *sample = cpal::Sample::from_sample(*value);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::Build(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(
        device_rate: u32,
    ) -> (
        Renderer,
        rtrb::Producer<OutputCommand>,
        rtrb::Consumer<OutputNotice>,
        DeviceClock,
    ) {
        let (command_tx, command_rx) = rtrb::RingBuffer::<OutputCommand>::new(8);
        let (notice_tx, notice_rx) = rtrb::RingBuffer::<OutputNotice>::new(8);
        let clock = DeviceClock::new(device_rate);
        let renderer = Renderer::new(command_rx, notice_tx, clock.clone(), 1);
        (renderer, command_tx, notice_rx, clock)
    }

    fn ramp(frames: usize, sample_rate: u32) -> Arc<AudioFile> {
        let data = (0..frames).map(|i| i as f32 / frames as f32).collect();
        Arc::new(AudioFile::from_interleaved(data, 1, sample_rate))
    }

    #[test]
    fn test_silent_until_start_frame() {
        let (mut renderer, mut commands, _notices, clock) = renderer(100);
        commands.push(OutputCommand::SetSource(Some(ramp(100, 100)))).unwrap();
        commands
            .push(OutputCommand::Start {
                start_at_seconds: 0.1,
                offset_seconds: 0.0,
                rate: 1.0,
            })
            .unwrap();

        let mut out = vec![0.0f32; 10];
        renderer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(clock.frames_rendered(), 10);
        assert!((clock.now() - 0.1).abs() < 1e-9);

        let mut out = vec![0.0f32; 3];
        renderer.render(&mut out);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 0.01).abs() < 1e-6);
        assert!((out[2] - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_offset_and_rate() {
        let (mut renderer, mut commands, _notices, _clock) = renderer(100);
        commands.push(OutputCommand::SetSource(Some(ramp(100, 100)))).unwrap();
        commands
            .push(OutputCommand::Start {
                start_at_seconds: 0.0,
                offset_seconds: 0.5,
                rate: 0.5,
            })
            .unwrap();

        let mut out = vec![0.0f32; 3];
        renderer.render(&mut out);
        assert!((out[0] - 0.5).abs() < 1e-6);
        // Half speed lands between source frames
        assert!((out[1] - 0.505).abs() < 1e-6);
        assert!((out[2] - 0.51).abs() < 1e-6);
    }

    #[test]
    fn test_end_of_buffer_notice() {
        let (mut renderer, mut commands, mut notices, _clock) = renderer(100);
        commands.push(OutputCommand::SetSource(Some(ramp(4, 100)))).unwrap();
        commands
            .push(OutputCommand::Start {
                start_at_seconds: 0.0,
                offset_seconds: 0.0,
                rate: 1.0,
            })
            .unwrap();

        let mut out = vec![0.0f32; 8];
        renderer.render(&mut out);
        assert_eq!(notices.pop().ok(), Some(OutputNotice::Ended));
        assert_eq!(&out[4..], &[0.0; 4]);
    }

    #[test]
    fn test_start_without_source_reports_error() {
        let (mut renderer, mut commands, mut notices, _clock) = renderer(100);
        commands
            .push(OutputCommand::Start {
                start_at_seconds: 0.0,
                offset_seconds: 0.0,
                rate: 1.0,
            })
            .unwrap();
        let mut out = vec![0.0f32; 4];
        renderer.render(&mut out);
        assert!(matches!(notices.pop(), Ok(OutputNotice::Error(_))));
    }
}
