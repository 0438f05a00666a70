//! Error types for duetto

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MIDI parse error: {0}")]
    MidiParse(String),

    #[error("Unsupported MIDI timing format (only metrical timing is supported)")]
    UnsupportedTiming,

    #[error("No MIDI file loaded")]
    NoMidiLoaded,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Command sink error: {0}")]
    Sink(String),

    #[error("Playback worker panicked")]
    WorkerPanicked,
}

impl From<midly::Error> for Error {
    fn from(e: midly::Error) -> Self {
        Error::MidiParse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
