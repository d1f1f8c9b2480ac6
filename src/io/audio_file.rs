use crate::error::{AudioDecodeError, FetchError, SyncError};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded PCM audio, interleaved f32 samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFile {
    pub data: Vec<f32>,
    pub channels: u32,
    pub sample_rate: u32,
    pub frames: u64,
}

impl AudioFile {
    /// Wrap already-decoded interleaved samples
    pub fn from_interleaved(data: Vec<f32>, channels: u32, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let frames = (data.len() / channels as usize) as u64;
        Self {
            data,
            channels,
            sample_rate,
            frames,
        }
    }

    /// Load an audio file from disk and decode it to interleaved f32 samples
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let path = path.as_ref();

        let file = std::fs::File::open(path).map_err(|source| FetchError::Io {
            location: path.display().to_string(),
            source,
        })?;

        // Create a probe hint using the file extension
        let extension = path.extension().and_then(|ext| ext.to_str());
        Ok(Self::decode(Box::new(file), extension)?)
    }

    /// Decode an in-memory encoded file (WAV, MP3, FLAC, ...)
    pub fn load_from_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<Self, AudioDecodeError> {
        Self::decode(Box::new(Cursor::new(bytes)), extension)
    }

    fn decode(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<Self, AudioDecodeError> {
        let mss = MediaSourceStream::new(source, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        // Probe the media source
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| AudioDecodeError::Probe(e.to_string()))?;

        let mut format = probed.format;

        // Find the default audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or(AudioDecodeError::NoTrack)?;

        let track_id = track.id;

        // Get audio parameters
        let codec_params = &track.codec_params;
        let channels = codec_params
            .channels
            .ok_or(AudioDecodeError::MissingParameter("channel count"))?
            .count() as u32;
        let sample_rate = codec_params
            .sample_rate
            .ok_or(AudioDecodeError::MissingParameter("sample rate"))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| AudioDecodeError::Decoder(e.to_string()))?;

        // Decode all packets
        let mut audio_data = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // End of stream
                    break;
                }
                Err(Error::ResetRequired) => {
                    return Err(AudioDecodeError::Decoder("decoder reset required".to_string()));
                }
                Err(e) => {
                    return Err(AudioDecodeError::Decoder(format!("failed to read packet: {}", e)));
                }
            };

            // Skip packets for other tracks
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let buf = sample_buf.get_or_insert_with(|| {
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec())
                    });
                    buf.copy_interleaved_ref(decoded);
                    audio_data.extend_from_slice(buf.samples());
                }
                Err(Error::DecodeError(e)) => {
                    log::warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(AudioDecodeError::Decoder(e.to_string()));
                }
            }
        }

        if audio_data.is_empty() {
            return Err(AudioDecodeError::Empty);
        }

        let file = Self::from_interleaved(audio_data, channels, sample_rate);
        log::debug!(
            "Decoded audio: {} ch, {} Hz, {:.2}s",
            file.channels,
            file.sample_rate,
            file.duration()
        );
        Ok(file)
    }

    /// Duration of the audio in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    /// Duration of the audio in milliseconds
    pub fn duration_ms(&self) -> f64 {
        self.duration() * 1000.0
    }

    /// Samples of one channel, de-interleaved
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        let channels = self.channels as usize;
        if channel >= channels {
            return Vec::new();
        }
        self.data.iter().skip(channel).step_by(channels).copied().collect()
    }

    /// Interleaved sample for (frame, channel), or silence past the end
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channels as usize;
        let channel = channel.min(channels.saturating_sub(1));
        self.data.get(frame * channels + channel).copied().unwrap_or(0.0)
    }
}
