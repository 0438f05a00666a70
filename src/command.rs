//! Text command protocol for the stereo synth
//!
//! One command per line, fields separated by commas:
//!
//! - `FREQ,<hz>,<duration_ms>,<channel>` plays a frequency on one channel
//! - `MONO,<pitch>,<duration_ms>` plays a MIDI note on both channels at once
//! - `BEND,<channel>,<target_hz>,<glide_ms>` glides the sounding note
//! - `STOP` silences both channels
//!
//! Frequencies are written with two decimals.

use std::fmt;

/// Output channel of the synth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Left = 0,
    Right = 1,
}

impl Channel {
    pub const BOTH: [Channel; 2] = [Channel::Left, Channel::Right];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Channel from a 0/1 index; anything else maps to the right channel
    pub fn from_index(index: u8) -> Self {
        if index == 0 {
            Channel::Left
        } else {
            Channel::Right
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// Frequency of a (possibly fractional) MIDI pitch
///
/// Formula: hz = 440 * 2^((pitch - 69) / 12)
pub fn midi_to_hz(pitch: f64) -> f64 {
    440.0 * 2f64.powf((pitch - 69.0) / 12.0)
}

/// A single line of the synth protocol
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Freq {
        hz: f64,
        duration_ms: u32,
        channel: Channel,
    },
    Mono {
        pitch: u8,
        duration_ms: u32,
    },
    Bend {
        channel: Channel,
        hz: f64,
        glide_ms: u32,
    },
    Stop,
}

impl Command {
    /// `FREQ` command for a MIDI pitch
    pub fn note(pitch: u8, duration_ms: u32, channel: Channel) -> Self {
        Command::Freq {
            hz: midi_to_hz(pitch as f64),
            duration_ms,
            channel,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Freq {
                hz,
                duration_ms,
                channel,
            } => write!(f, "FREQ,{:.2},{},{}", hz, duration_ms, channel),
            Command::Mono { pitch, duration_ms } => write!(f, "MONO,{},{}", pitch, duration_ms),
            Command::Bend {
                channel,
                hz,
                glide_ms,
            } => write!(f, "BEND,{},{:.2},{}", channel, hz, glide_ms),
            Command::Stop => write!(f, "STOP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_to_hz() {
        assert!((midi_to_hz(69.0) - 440.0).abs() < 1e-9);
        assert!((midi_to_hz(81.0) - 880.0).abs() < 1e-9);
        assert!((midi_to_hz(60.0) - 261.6256).abs() < 1e-3);

        // Half a semitone above A4
        let expected = 440.0 * 2f64.powf(0.5 / 12.0);
        assert!((midi_to_hz(69.5) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_command_lines() {
        assert_eq!(Command::note(69, 500, Channel::Left).to_string(), "FREQ,440.00,500,0");
        assert_eq!(Command::note(60, 80, Channel::Right).to_string(), "FREQ,261.63,80,1");
        assert_eq!(
            Command::Mono {
                pitch: 60,
                duration_ms: 250
            }
            .to_string(),
            "MONO,60,250"
        );
        assert_eq!(
            Command::Bend {
                channel: Channel::Right,
                hz: midi_to_hz(71.0),
                glide_ms: 200
            }
            .to_string(),
            "BEND,1,493.88,200"
        );
        assert_eq!(Command::Stop.to_string(), "STOP");
    }

    #[test]
    fn test_channel_index() {
        assert_eq!(Channel::Left.index(), 0);
        assert_eq!(Channel::Right.index(), 1);
        assert_eq!(Channel::from_index(0), Channel::Left);
        assert_eq!(Channel::from_index(1), Channel::Right);
    }
}
