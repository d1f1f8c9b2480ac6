use thiserror::Error;

/// Malformed or unsupported Standard MIDI File data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected chunk \"{expected}\" at byte {offset}, found {found:?}")]
    BadMagic {
        expected: &'static str,
        found: [u8; 4],
        offset: usize,
    },

    #[error("unexpected end of data at byte {offset}")]
    UnexpectedEof { offset: usize },

    #[error("SMPTE time division is not supported")]
    InvalidDivision,

    #[error("ticks per quarter note must be non-zero")]
    ZeroTicksPerQuarter,

    #[error("data byte at {offset} with no running status")]
    MissingRunningStatus { offset: usize },

    #[error("unexpected status byte {status:#04x} at {offset}")]
    UnexpectedStatus { status: u8, offset: usize },

    #[error("no MIDI part could be parsed")]
    NoTracks,
}

/// Failure to obtain the bytes of a MIDI part or audio file
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("failed to read {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("all candidates failed: {0:?}")]
    AllCandidatesFailed(Vec<String>),
}

/// Compressed audio could not be turned into PCM
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioDecodeError {
    #[error("failed to probe audio: {0}")]
    Probe(String),

    #[error("no decodable audio track found")]
    NoTrack,

    #[error("audio stream is missing {0}")]
    MissingParameter(&'static str),

    #[error("decoder failed: {0}")]
    Decoder(String),

    #[error("audio buffer is empty")]
    Empty,
}

/// The scheduler could not begin or continue playback
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulingError {
    #[error("audio is unavailable; the audio track is the playback clock")]
    AudioUnavailable,

    #[error("no performance is loaded")]
    NotLoaded,

    #[error("audio backend refused to start: {0}")]
    BackendRefused(String),

    #[error("invalid playback rate {0}")]
    InvalidPlaybackRate(f64),
}

/// The audio output device could not be opened
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("no default output device")]
    NoOutputDevice,

    #[error("failed to query output config: {0}")]
    Config(String),

    #[error("unsupported sample format {0}")]
    UnsupportedFormat(String),

    #[error("failed to build output stream: {0}")]
    Build(String),

    #[error("failed to start output stream: {0}")]
    Play(String),
}

/// Settings or catalog file problems
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not determine a config directory")]
    NoConfigDir,

    #[error("unknown track \"{0}\"")]
    UnknownTrack(String),
}

/// Errors surfaced at the load/playback boundary
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    AudioDecode(#[from] AudioDecodeError),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
