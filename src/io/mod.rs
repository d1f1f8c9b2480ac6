pub mod audio_file;
pub mod cpal_output;
pub mod midi_file;
pub mod smf_reader;
pub mod source;

pub use audio_file::AudioFile;
pub use cpal_output::{CpalAudioOutput, DeviceClock};
pub use midi_file::{decode_smf, DecodedSmf};
pub use source::{AssetSource, FileSource, MemorySource};
