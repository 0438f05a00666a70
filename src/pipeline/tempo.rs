//! Tick to wall-clock conversion
//!
//! MIDI files store time as tick deltas. Seconds depend on the ticks-per-beat
//! resolution from the header and the tempo (microseconds per quarter note)
//! that is in effect when the conversion happens.

/// Tempo assumed until the first tempo message (120 BPM)
pub const DEFAULT_TEMPO: u32 = 500_000;

/// Convert a tick count to seconds at a fixed tempo
///
/// Formula: seconds = ticks / ticks_per_beat * tempo / 1_000_000
pub fn ticks_to_seconds(ticks: u64, ticks_per_beat: u16, tempo_micros: u32) -> f64 {
    if ticks_per_beat == 0 {
        return 0.0;
    }
    ticks as f64 / ticks_per_beat as f64 * (tempo_micros as f64 / 1_000_000.0)
}

/// Converts absolute ticks using a running tempo
///
/// The tempo is replaced in place whenever a tempo message is seen, and every
/// conversion uses whatever tempo is current at that moment.
#[derive(Debug, Clone)]
pub struct TimeConverter {
    ticks_per_beat: u16,
    tempo: u32,
}

impl TimeConverter {
    pub fn new(ticks_per_beat: u16) -> Self {
        Self {
            ticks_per_beat,
            tempo: DEFAULT_TEMPO,
        }
    }

    pub fn set_tempo(&mut self, tempo_micros: u32) {
        self.tempo = tempo_micros;
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn seconds(&self, tick: u64) -> f64 {
        ticks_to_seconds(tick, self.ticks_per_beat, self.tempo)
    }
}

/// A tempo change at an absolute tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoChange {
    pub tick: u64,
    pub micros_per_quarter: u32,
}

/// Tempo changes seen in a file, in the order they were encountered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TempoMap {
    changes: Vec<TempoChange>,
}

impl TempoMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tick: u64, micros_per_quarter: u32) {
        self.changes.push(TempoChange {
            tick,
            micros_per_quarter,
        });
    }

    pub fn changes(&self) -> &[TempoChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Tempo of the latest change at or before `tick`
    pub fn tempo_at(&self, tick: u64) -> u32 {
        self.changes
            .iter()
            .filter(|c| c.tick <= tick)
            .max_by_key(|c| c.tick)
            .map(|c| c.micros_per_quarter)
            .unwrap_or(DEFAULT_TEMPO)
    }

    /// BPM at tick 0
    pub fn initial_bpm(&self) -> f64 {
        60_000_000.0 / self.tempo_at(0) as f64
    }
}
