//! End-to-end playback of Standard MIDI Files written with midly

use std::time::Duration;

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Fps, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};

use duetto::pipeline::grouper::DurationStrategy;
use duetto::pipeline::parser::{analyze_tracks, extract_notes, MidiSource};
use duetto::pipeline::policy::{PlayableEvent, StereoMode};
use duetto::pipeline::scheduler::{Dispatcher, ManualClock, PlaybackConfig, PlaybackState, Player};
use duetto::{Channel, Error, MemorySink};

const TICKS_PER_BEAT: u16 = 480;

fn event(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind,
    }
}

fn note_on(delta: u32, channel: u8, key: u8, vel: u8) -> TrackEvent<'static> {
    event(
        delta,
        TrackEventKind::Midi {
            channel: u4::new(channel),
            message: MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(vel),
            },
        },
    )
}

fn note_off(delta: u32, channel: u8, key: u8) -> TrackEvent<'static> {
    event(
        delta,
        TrackEventKind::Midi {
            channel: u4::new(channel),
            message: MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            },
        },
    )
}

fn write(smf: &Smf<'_>) -> Vec<u8> {
    let mut buf = Vec::new();
    smf.write(&mut buf).unwrap();
    buf
}

/// Tempo track plus one melody track:
/// C4 + E4 together for one beat, a drum hit, then G4 for half a beat
fn song() -> Vec<u8> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_BEAT)),
    ));

    let tempo_track: Track<'static> = vec![
        event(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000)))),
        event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
    ];
    smf.tracks.push(tempo_track);

    let melody: Track<'static> = vec![
        note_on(0, 0, 60, 100),
        note_on(0, 0, 64, 80),
        note_on(0, 9, 36, 127),
        note_off(240, 9, 36),
        note_off(240, 0, 60),
        note_off(0, 0, 64),
        note_on(480, 0, 67, 90),
        // Velocity-zero note-on ends the note
        note_on(240, 0, 67, 0),
        event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
    ];
    smf.tracks.push(melody);

    write(&smf)
}

#[test]
fn test_extracts_notes_from_written_file() {
    let source = MidiSource::parse(&song()).unwrap();
    assert_eq!(source.ticks_per_beat(), TICKS_PER_BEAT);

    let notes = extract_notes(&source);
    let summary: Vec<(f64, u8, u8, u32)> = notes
        .iter()
        .map(|n| (n.start, n.pitch, n.velocity, n.duration_ms))
        .collect();
    assert_eq!(
        summary,
        vec![(0.0, 60, 100, 500), (0.0, 64, 80, 500), (1.0, 67, 90, 250)]
    );

    let tracks = analyze_tracks(&source);
    assert_eq!(tracks.len(), 2);
    assert!(!tracks[0].has_notes());
    assert_eq!(tracks[1].note_count, 4);
    assert_eq!(tracks[1].lowest, Some(36));
    assert_eq!(tracks[1].highest, Some(67));
}

#[test]
fn test_chord_and_auto_modes() {
    let source = MidiSource::parse(&song()).unwrap();

    let chord = PlaybackConfig {
        stereo_mode: StereoMode::Chord,
        ..Default::default()
    }
    .schedule(&source);
    assert_eq!(chord.len(), 2);
    assert_eq!(
        chord.groups[0].events,
        vec![PlayableEvent::Chord {
            pitch1: 60,
            pitch2: 64,
            duration_ms: 500,
            velocity1: 100,
            velocity2: 80,
        }]
    );

    let auto = PlaybackConfig::default().schedule(&source);
    let first: Vec<(Channel, u8)> = auto.groups[0]
        .events
        .iter()
        .flat_map(|e| e.channel_pitches())
        .collect();
    assert_eq!(first, vec![(Channel::Left, 60), (Channel::Right, 64)]);
}

#[test]
fn test_dispatch_paced_by_clock() {
    let source = MidiSource::parse(&song()).unwrap();
    let config = PlaybackConfig {
        stereo_mode: StereoMode::Chord,
        tempo_multiplier: 2.0,
        ..Default::default()
    };
    let schedule = config.schedule(&source);

    let sink = MemorySink::new();
    let clock = ManualClock::new();
    let mut dispatcher = Dispatcher::with_clock(sink.clone(), clock.clone(), config);

    assert_eq!(dispatcher.play(&schedule, &mut ()), PlaybackState::Completed);
    assert_eq!(
        sink.lines(),
        vec!["FREQ,261.63,500,0", "FREQ,329.63,500,1", "FREQ,392.00,250,1"]
    );
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
}

#[test]
fn test_gap_durations_and_mono() {
    let source = MidiSource::parse(&song()).unwrap();
    let config = PlaybackConfig {
        stereo_mode: StereoMode::Mono,
        durations: DurationStrategy::GapDerived,
        ..Default::default()
    };
    let schedule = config.schedule(&source);

    let sink = MemorySink::new();
    let mut dispatcher = Dispatcher::with_clock(sink.clone(), ManualClock::new(), config);
    dispatcher.play(&schedule, &mut ());

    // Pair splits across channels, the lone note plays on both
    assert_eq!(
        sink.lines(),
        vec!["FREQ,261.63,900,0", "FREQ,329.63,900,1", "MONO,67,500"]
    );
}

#[test]
fn test_player_plays_file_from_disk() {
    let path = std::env::temp_dir().join(format!("duetto-playback-{}.mid", std::process::id()));
    std::fs::write(&path, song()).unwrap();

    let sink = MemorySink::new();
    let mut player = Player::with_clock(sink.clone(), ManualClock::new(), PlaybackConfig::default());
    player.load_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert!(player.play(()).unwrap());
    assert_eq!(player.wait().unwrap(), PlaybackState::Completed);
    assert_eq!(
        sink.lines(),
        vec!["FREQ,261.63,500,0", "FREQ,329.63,500,1", "FREQ,392.00,250,1"]
    );
}

#[test]
fn test_rejects_bad_input() {
    assert!(matches!(
        MidiSource::parse(b"definitely not midi"),
        Err(Error::MidiParse(_))
    ));

    let mut smf = Smf::new(Header::new(Format::SingleTrack, Timing::Timecode(Fps::Fps25, 40)));
    smf.tracks
        .push(vec![event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack))]);
    assert!(matches!(
        MidiSource::parse(&write(&smf)),
        Err(Error::UnsupportedTiming)
    ));
}
