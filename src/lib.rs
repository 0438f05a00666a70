//! Plays MIDI files on a two-channel monophonic synth
//!
//! Notes are extracted from a MIDI file, grouped into moments that sound
//! together, reduced to at most two voices per moment and sent to the synth
//! as text commands at the right wall-clock time.

pub mod command;
pub mod error;
pub mod pipeline;
pub mod sink;

pub use command::{Channel, Command};
pub use error::{Error, Result};
pub use sink::{CommandSink, LogObserver, MemorySink, PlaybackObserver, WriterSink};
