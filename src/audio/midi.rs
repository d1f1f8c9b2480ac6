/// Sustain pedal controller number
pub const SUSTAIN_CONTROLLER: u8 = 64;

/// Controller values at or above this count as "pedal down"
pub const SUSTAIN_ON_THRESHOLD: u8 = 64;

/// The subset of MIDI messages the sync engine cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EventKind {
    /// Note on with non-zero velocity
    NoteOn { note: u8, velocity: u8 },
    /// Note off, or note on with velocity 0
    NoteOff { note: u8, velocity: u8 },
    /// Controller 64 with its raw value
    ControllerSustain { value: u8 },
}

/// MIDI event stamped with its absolute tick within a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RawEvent {
    /// Absolute tick (accumulated delta times)
    pub tick: u32,
    /// MIDI channel (0-15)
    pub channel: u8,
    pub kind: EventKind,
}

impl RawEvent {
    /// Create a note on event; velocity 0 produces a note off as MIDI prescribes
    pub fn note_on(tick: u32, channel: u8, note: u8, velocity: u8) -> Self {
        let kind = if velocity > 0 {
            EventKind::NoteOn { note, velocity }
        } else {
            EventKind::NoteOff { note, velocity: 0 }
        };
        Self {
            tick,
            channel: channel & 0x0F,
            kind,
        }
    }

    /// Create a note off event
    pub fn note_off(tick: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            tick,
            channel: channel & 0x0F,
            kind: EventKind::NoteOff { note, velocity },
        }
    }

    /// Create a sustain pedal (CC64) event
    pub fn sustain(tick: u32, channel: u8, value: u8) -> Self {
        Self {
            tick,
            channel: channel & 0x0F,
            kind: EventKind::ControllerSustain { value },
        }
    }

    /// Resolve this event to wall-clock time
    pub fn at_ms(self, time_ms: f64) -> TimedEvent {
        TimedEvent {
            time_ms,
            tick: self.tick,
            channel: self.channel,
            kind: self.kind,
        }
    }
}

/// MIDI event with its tick resolved to milliseconds through the tempo map.
///
/// Timelines keep these sorted ascending by `time_ms`, ties in file order.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimedEvent {
    /// Time position in milliseconds from the start of the file
    pub time_ms: f64,
    /// Original tick (kept for diagnostics)
    pub tick: u32,
    /// MIDI channel (0-15)
    pub channel: u8,
    pub kind: EventKind,
}

impl TimedEvent {
    /// Check if this is a note on event
    pub fn is_note_on(&self) -> bool {
        matches!(self.kind, EventKind::NoteOn { .. })
    }

    /// Check if this is a note off event
    pub fn is_note_off(&self) -> bool {
        matches!(self.kind, EventKind::NoteOff { .. })
    }

    /// Note number for note events
    pub fn note(&self) -> Option<u8> {
        match self.kind {
            EventKind::NoteOn { note, .. } | EventKind::NoteOff { note, .. } => Some(note),
            EventKind::ControllerSustain { .. } => None,
        }
    }

    /// Velocity for note events
    pub fn velocity(&self) -> Option<u8> {
        match self.kind {
            EventKind::NoteOn { velocity, .. } | EventKind::NoteOff { velocity, .. } => {
                Some(velocity)
            }
            EventKind::ControllerSustain { .. } => None,
        }
    }

    /// Whether this is a CC64 event putting the pedal down
    pub fn is_sustain_press(&self) -> bool {
        matches!(self.kind, EventKind::ControllerSustain { value } if value >= SUSTAIN_ON_THRESHOLD)
    }
}
