//! Per-note and sustain-pedal rotation state machines
//!
//! Each machine eases between a start and target angle with smoothstep over a
//! fixed duration. Angles are radians; the renderer only reads them.

/// Key press ramp duration
pub const PRESS_ATTACK_MS: f64 = 55.0;
/// Key release ramp duration
pub const RELEASE_DECAY_MS: f64 = 110.0;
/// Velocities below this press the key as shallowly as possible
pub const VELOCITY_MIN: u8 = 20;
pub const VELOCITY_MAX: u8 = 127;

pub const PEDAL_PRESS_MS: f64 = 85.0;
pub const PEDAL_RELEASE_MS: f64 = 140.0;
/// A press closer than this to a release skips the tail of the release
pub const PEDAL_LOOKAHEAD_MS: f64 = 160.0;

/// Number of MIDI note numbers
pub const NOTE_COUNT: usize = 128;

/// Animation phase shared by keys and the pedal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum AnimPhase {
    #[default]
    Idle,
    Press,
    Held,
    Release,
}

/// Smoothstep easing of `t` in [0, 1]
pub fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Depth scale in [0, 1] for a note velocity
pub fn velocity_depth_scale(velocity: u8) -> f64 {
    let v = velocity.clamp(VELOCITY_MIN, VELOCITY_MAX);
    (v - VELOCITY_MIN) as f64 / (VELOCITY_MAX - VELOCITY_MIN) as f64
}

/// Whether a note number falls on a black key
pub fn is_black_key(note: u8) -> bool {
    matches!(note % 12, 1 | 3 | 6 | 8 | 10)
}

/// Maximum rotation per key colour and the pedal
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct KeyGeometry {
    pub white_max_deg: f64,
    pub black_max_deg: f64,
    pub pedal_max_deg: f64,
    /// Small snap toward rest when a pedal release is shortly followed by a press
    pub pedal_bounce_deg: f64,
    /// +1 or -1 depending on which way the model rotates downward
    pub press_sign: f64,
}

impl Default for KeyGeometry {
    fn default() -> Self {
        Self {
            white_max_deg: 4.0,
            black_max_deg: 5.0,
            pedal_max_deg: 6.0,
            pedal_bounce_deg: 0.9,
            press_sign: 1.0,
        }
    }
}

impl KeyGeometry {
    /// Full-depth angle in radians for a note
    pub fn base_angle(&self, note: u8) -> f64 {
        let deg = if is_black_key(note) {
            self.black_max_deg
        } else {
            self.white_max_deg
        };
        deg.to_radians() * self.press_sign
    }

    pub fn pedal_max_angle(&self) -> f64 {
        self.pedal_max_deg.to_radians()
    }

    pub fn pedal_bounce_angle(&self) -> f64 {
        self.pedal_bounce_deg.to_radians()
    }
}

/// Eased transition shared by keys and the pedal
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
struct Ramp {
    phase: AnimPhase,
    start_ms: f64,
    from_angle: f64,
    target_angle: f64,
    /// Last sampled angle
    angle: f64,
}

impl Ramp {
    fn begin(&mut self, phase: AnimPhase, now_ms: f64, target_angle: f64) {
        self.phase = phase;
        self.start_ms = now_ms;
        self.from_angle = self.angle;
        self.target_angle = target_angle;
    }

    /// Advance to `now_ms`; finished ramps settle on their target
    fn sample(&mut self, now_ms: f64, press_ms: f64, release_ms: f64) -> f64 {
        let duration = match self.phase {
            AnimPhase::Press => press_ms,
            AnimPhase::Release => release_ms,
            AnimPhase::Idle | AnimPhase::Held => return self.angle,
        };

        let t = ((now_ms - self.start_ms) / duration.max(1.0)).max(0.0);
        if t >= 1.0 {
            self.angle = self.target_angle;
            self.from_angle = self.target_angle;
            self.phase = match self.phase {
                AnimPhase::Press => AnimPhase::Held,
                _ => AnimPhase::Idle,
            };
        } else {
            self.angle = self.from_angle + (self.target_angle - self.from_angle) * smoothstep(t);
        }
        self.angle
    }

    fn remaining_ms(&self, now_ms: f64, duration: f64) -> f64 {
        (duration - (now_ms - self.start_ms)).max(0.0)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Rotation state of one key
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct NoteAnimState {
    ramp: Ramp,
}

impl NoteAnimState {
    pub fn phase(&self) -> AnimPhase {
        self.ramp.phase
    }

    /// Angle as of the last sample
    pub fn angle(&self) -> f64 {
        self.ramp.angle
    }

    pub fn target_angle(&self) -> f64 {
        self.ramp.target_angle
    }

    pub fn start_ms(&self) -> f64 {
        self.ramp.start_ms
    }

    /// Start pressing toward a velocity-scaled depth
    pub fn note_on(&mut self, now_ms: f64, base_angle: f64, velocity: u8) {
        self.sample(now_ms);
        let target = base_angle * (0.55 + 0.45 * velocity_depth_scale(velocity));
        self.ramp.begin(AnimPhase::Press, now_ms, target);
    }

    /// Start returning to rest
    pub fn note_off(&mut self, now_ms: f64) {
        self.sample(now_ms);
        self.ramp.begin(AnimPhase::Release, now_ms, 0.0);
    }

    pub fn sample(&mut self, now_ms: f64) -> f64 {
        self.ramp.sample(now_ms, PRESS_ATTACK_MS, RELEASE_DECAY_MS)
    }

    pub fn reset(&mut self) {
        self.ramp.reset();
    }
}

/// Rotation state of the sustain pedal
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct PedalAnimState {
    ramp: Ramp,
}

impl PedalAnimState {
    pub fn phase(&self) -> AnimPhase {
        self.ramp.phase
    }

    pub fn angle(&self) -> f64 {
        self.ramp.angle
    }

    /// Pedal is down or on its way down
    pub fn is_engaged(&self) -> bool {
        matches!(self.ramp.phase, AnimPhase::Press | AnimPhase::Held)
    }

    pub fn press(&mut self, now_ms: f64, max_angle: f64) {
        self.sample(now_ms);
        // A release almost done would visibly bounce; restart from rest instead
        if self.ramp.phase == AnimPhase::Release
            && self.ramp.remaining_ms(now_ms, PEDAL_RELEASE_MS) < PEDAL_LOOKAHEAD_MS
        {
            self.ramp.angle = 0.0;
            self.ramp.from_angle = 0.0;
        }
        self.ramp.begin(AnimPhase::Press, now_ms, max_angle);
    }

    /// Start lifting. `next_press_gap_ms` is the time from this release to the
    /// next press in the performance, if any.
    pub fn release(&mut self, now_ms: f64, next_press_gap_ms: Option<f64>, bounce_angle: f64) {
        self.sample(now_ms);
        if matches!(next_press_gap_ms, Some(gap) if gap < PEDAL_LOOKAHEAD_MS) {
            self.ramp.angle = (self.ramp.angle - bounce_angle).max(0.0);
        }
        self.ramp.begin(AnimPhase::Release, now_ms, 0.0);
    }

    pub fn sample(&mut self, now_ms: f64) -> f64 {
        self.ramp.sample(now_ms, PEDAL_PRESS_MS, PEDAL_RELEASE_MS)
    }

    pub fn reset(&mut self) {
        self.ramp.reset();
    }
}

/// Key states indexed by note number, created when a note is first used
#[derive(Debug, Clone)]
pub struct NoteAnimationTable {
    states: [Option<NoteAnimState>; NOTE_COUNT],
    geometry: KeyGeometry,
}

impl Default for NoteAnimationTable {
    fn default() -> Self {
        Self::new(KeyGeometry::default())
    }
}

impl NoteAnimationTable {
    pub fn new(geometry: KeyGeometry) -> Self {
        Self {
            states: [None; NOTE_COUNT],
            geometry,
        }
    }

    pub fn geometry(&self) -> &KeyGeometry {
        &self.geometry
    }

    pub fn get(&self, note: u8) -> Option<&NoteAnimState> {
        self.states.get(note as usize).and_then(|s| s.as_ref())
    }

    fn entry(&mut self, note: u8) -> &mut NoteAnimState {
        self.states[(note & 0x7F) as usize].get_or_insert_with(NoteAnimState::default)
    }

    pub fn note_on(&mut self, note: u8, velocity: u8, now_ms: f64) {
        let base = self.geometry.base_angle(note);
        self.entry(note).note_on(now_ms, base, velocity);
    }

    pub fn note_off(&mut self, note: u8, now_ms: f64) {
        self.entry(note).note_off(now_ms);
    }

    /// Advance every tracked key to `now_ms`
    pub fn sample(&mut self, now_ms: f64) {
        for state in self.states.iter_mut().flatten() {
            state.sample(now_ms);
        }
    }

    /// Every key back to idle at rest; entries are kept for reuse
    pub fn reset(&mut self) {
        for state in self.states.iter_mut().flatten() {
            state.reset();
        }
    }

    /// (note, angle) for every tracked key
    pub fn angles(&self) -> Vec<(u8, f64)> {
        self.iter().map(|(note, s)| (note, s.angle())).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &NoteAnimState)> {
        self.states
            .iter()
            .enumerate()
            .filter_map(|(note, s)| s.as_ref().map(|s| (note as u8, s)))
    }

    /// True when no key is moving or held
    pub fn all_idle(&self) -> bool {
        self.iter()
            .all(|(_, s)| s.phase() == AnimPhase::Idle && s.angle() == 0.0)
    }
}
