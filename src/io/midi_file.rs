use crate::audio::midi::{RawEvent, SUSTAIN_CONTROLLER};
use crate::audio::tempo::TempoChange;
use crate::error::ParseError;
use crate::io::smf_reader::SmfReader;

/// Meta event type for "set tempo"
const META_SET_TEMPO: u8 = 0x51;
/// Meta event type for "end of track"
const META_END_OF_TRACK: u8 = 0x2F;

/// Everything the decoder extracted from one SMF buffer
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSmf {
    /// Header format (0, 1 or 2)
    pub format: u16,
    pub ticks_per_quarter: u16,
    /// Track count declared in the header
    pub declared_tracks: u16,
    /// Tracks fully or partially decoded
    pub tracks_decoded: usize,
    /// Note/sustain events of all tracks, in file order
    pub events: Vec<RawEvent>,
    pub tempo_changes: Vec<TempoChange>,
    /// Set when decoding stopped early; the events above are still usable
    pub aborted: Option<ParseError>,
}

/// Decode a Standard MIDI File into tick-stamped events and tempo changes.
///
/// A malformed header is an error. A corrupt chunk or truncated track stops
/// decoding of the remaining tracks; whatever was decoded before it is returned
/// with `aborted` set.
pub fn decode_smf(bytes: &[u8]) -> Result<DecodedSmf, ParseError> {
    let mut reader = SmfReader::new(bytes);

    // Header chunk
    reader.expect_tag("MThd")?;
    let header_len = reader.read_u32()? as usize;
    let mut header = reader.sub_reader(header_len);
    let format = header.read_u16()?;
    let declared_tracks = header.read_u16()?;
    let division = header.read_u16()?;

    if division & 0x8000 != 0 {
        return Err(ParseError::InvalidDivision);
    }
    if division == 0 {
        return Err(ParseError::ZeroTicksPerQuarter);
    }

    let mut decoded = DecodedSmf {
        format,
        ticks_per_quarter: division,
        declared_tracks,
        tracks_decoded: 0,
        events: Vec::new(),
        tempo_changes: Vec::new(),
        aborted: None,
    };

    for track_index in 0..declared_tracks {
        if let Err(e) = reader.expect_tag("MTrk") {
            log::warn!("Stopping at track {}: {}", track_index, e);
            decoded.aborted = Some(e);
            break;
        }
        let track_len = match reader.read_u32() {
            Ok(len) => len as usize,
            Err(e) => {
                decoded.aborted = Some(e);
                break;
            }
        };

        let mut track = reader.sub_reader(track_len);
        let result = decode_track(&mut track, &mut decoded.events, &mut decoded.tempo_changes);
        decoded.tracks_decoded += 1;

        if let Err(e) = result {
            log::warn!("Track {} is corrupt, keeping partial data: {}", track_index, e);
            decoded.aborted = Some(e);
            break;
        }
    }

    log::debug!(
        "Decoded SMF format {} ({} of {} tracks, tpq {}): {} events, {} tempo changes",
        decoded.format,
        decoded.tracks_decoded,
        decoded.declared_tracks,
        decoded.ticks_per_quarter,
        decoded.events.len(),
        decoded.tempo_changes.len()
    );

    Ok(decoded)
}

/// Decode one MTrk chunk body, appending events as they are found
fn decode_track(
    track: &mut SmfReader,
    events: &mut Vec<RawEvent>,
    tempo_changes: &mut Vec<TempoChange>,
) -> Result<(), ParseError> {
    let mut tick = 0u32;
    let mut running_status: Option<u8> = None;

    while !track.is_empty() {
        tick = tick.saturating_add(track.read_vlq()?);

        let status_offset = track.position();
        let status = if track.peek_u8()? < 0x80 {
            // Data byte: reuse the previous channel status
            running_status.ok_or(ParseError::MissingRunningStatus {
                offset: status_offset,
            })?
        } else {
            track.read_u8()?
        };

        match status {
            0xFF => {
                let meta_type = track.read_u8()?;
                let len = track.read_vlq()? as usize;
                if meta_type == META_SET_TEMPO && len == 3 {
                    let microseconds_per_quarter = track.read_u24()?;
                    tempo_changes.push(TempoChange {
                        tick,
                        microseconds_per_quarter,
                    });
                } else {
                    track.skip(len)?;
                    if meta_type == META_END_OF_TRACK {
                        break;
                    }
                }
            }
            0xF0 | 0xF7 => {
                let len = track.read_vlq()? as usize;
                track.skip(len)?;
            }
            0xF1..=0xFE => {
                return Err(ParseError::UnexpectedStatus {
                    status,
                    offset: status_offset,
                });
            }
            _ => {
                running_status = Some(status);
                let channel = status & 0x0F;
                match status & 0xF0 {
                    0x80 => {
                        let note = track.read_u8()? & 0x7F;
                        let velocity = track.read_u8()? & 0x7F;
                        events.push(RawEvent::note_off(tick, channel, note, velocity));
                    }
                    0x90 => {
                        let note = track.read_u8()? & 0x7F;
                        let velocity = track.read_u8()? & 0x7F;
                        events.push(RawEvent::note_on(tick, channel, note, velocity));
                    }
                    0xB0 => {
                        let controller = track.read_u8()? & 0x7F;
                        let value = track.read_u8()? & 0x7F;
                        if controller == SUSTAIN_CONTROLLER {
                            events.push(RawEvent::sustain(tick, channel, value));
                        }
                    }
                    // Program change and channel pressure carry one data byte
                    0xC0 | 0xD0 => track.skip(1)?,
                    // Polyphonic aftertouch and pitch bend carry two
                    _ => track.skip(2)?,
                }
            }
        }
    }

    Ok(())
}
