// MIDI output from voices.
//
// Converts a `Voice` into a Standard MIDI File (SMF) for export and for the
// external synthesizer renderer. Output is SMF Format 1: track 0 holds the
// tempo, track 1 the notes. Beat voices go on channel 10 (index 9), the
// General MIDI percussion channel; everything else on channel 1.
//
// Uses the `midly` crate for MIDI writing.

use crate::error::RenderError;
use crate::voice::Voice;
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;

/// Ticks per quarter note in MIDI output.
pub const TICKS_PER_QUARTER: u16 = 480;

const PERCUSSION_CHANNEL: u8 = 9;
const MELODIC_CHANNEL: u8 = 0;

fn beats_to_ticks(beats: f64) -> u32 {
    (beats * TICKS_PER_QUARTER as f64).round().max(0.0) as u32
}

/// Encode a voice as SMF bytes.
pub fn encode_voice_midi(voice: &Voice, tempo_bpm: u32) -> Result<Vec<u8>, RenderError> {
    let smf = voice_to_smf(voice, tempo_bpm)?;
    let mut buf = Vec::new();
    smf.write_std(&mut buf)
        .map_err(|e| RenderError::Midi(e.to_string()))?;
    Ok(buf)
}

/// Convert a voice to MIDI and write it to a file.
pub fn write_voice_midi(voice: &Voice, tempo_bpm: u32, path: &Path) -> Result<(), RenderError> {
    let buf = encode_voice_midi(voice, tempo_bpm)?;
    std::fs::write(path, &buf)?;
    Ok(())
}

/// Convert a voice to an in-memory SMF.
fn voice_to_smf(voice: &Voice, tempo_bpm: u32) -> Result<Smf<'static>, RenderError> {
    if tempo_bpm == 0 {
        return Err(RenderError::Midi("tempo must be positive".into()));
    }
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // Track 0: tempo track
    let mut tempo_track: Track<'static> = Vec::new();
    let tempo_microseconds = 60_000_000 / tempo_bpm;
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
    });
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(tempo_track);

    let channel = u4::new(if voice.layer.is_percussion() {
        PERCUSSION_CHANNEL
    } else {
        MELODIC_CHANNEL
    });

    // (tick, is_on, key, velocity). Offs sort before ons at the same tick so
    // a repeated pitch retriggers cleanly.
    let mut timed: Vec<(u32, bool, u8, u8)> = Vec::with_capacity(voice.events.len() * 2);
    for event in &voice.events {
        if event.pitch > 127 {
            return Err(RenderError::Midi(format!("pitch {} out of range", event.pitch)));
        }
        let on = beats_to_ticks(event.onset);
        let off = beats_to_ticks(event.end()).max(on + 1);
        timed.push((on, true, event.pitch, event.velocity.min(127)));
        timed.push((off, false, event.pitch, 0));
    }
    timed.sort_by_key(|&(tick, is_on, key, _)| (tick, is_on, key));

    let mut track: Track<'static> = Vec::new();
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(voice.layer.name().as_bytes())),
    });

    let mut last_tick = 0u32;
    for (tick, is_on, key, vel) in timed {
        let message = if is_on {
            MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(vel),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            }
        };
        track.push(TrackEvent {
            delta: u28::new(tick - last_tick),
            kind: TrackEventKind::Midi { channel, message },
        });
        last_tick = tick;
    }

    // Hold the track open through trailing rests.
    let length_ticks = beats_to_ticks(voice.length_beats).max(last_tick);
    track.push(TrackEvent {
        delta: u28::new(length_ticks - last_tick),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(track);

    Ok(smf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{Layer, NoteEvent};

    fn note_ons(smf: &Smf) -> Vec<(u8, u8)> {
        smf.tracks[1]
            .iter()
            .filter_map(|e| match e.kind {
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn { key, .. },
                } => Some((channel.as_int(), key.as_int())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_voice_to_smf_basic() {
        let voice = Voice::sequential(Layer::Melody, &[(60, 1.0, 80), (64, 2.0, 90)]);
        let smf = voice_to_smf(&voice, 120).unwrap();
        // 1 tempo track + 1 note track
        assert_eq!(smf.tracks.len(), 2);
        assert_eq!(note_ons(&smf), vec![(0, 60), (0, 64)]);
    }

    #[test]
    fn test_beat_uses_percussion_channel() {
        let voice = Voice::new(
            Layer::Beat,
            vec![NoteEvent::new(36, 0.0, 1.0, 100), NoteEvent::new(38, 2.0, 1.0, 100)],
            4.0,
        );
        let smf = voice_to_smf(&voice, 100).unwrap();
        assert_eq!(note_ons(&smf), vec![(9, 36), (9, 38)]);
    }

    #[test]
    fn test_chord_tones_share_onset() {
        let voice = Voice::new(
            Layer::Harmony,
            vec![
                NoteEvent::new(60, 0.0, 4.0, 100),
                NoteEvent::new(64, 0.0, 4.0, 100),
                NoteEvent::new(67, 0.0, 4.0, 100),
            ],
            4.0,
        );
        let smf = voice_to_smf(&voice, 90).unwrap();
        let deltas: Vec<u32> = smf.tracks[1].iter().map(|e| e.delta.as_int()).collect();
        // name, 3 ons at 0, first off after a whole note, then simultaneous offs
        assert_eq!(deltas, vec![0, 0, 0, 0, 1920, 0, 0, 0]);
    }

    #[test]
    fn test_encoded_bytes_parse_back() {
        let voice = Voice::sequential(Layer::Bassline, &[(36, 1.0, 80), (36, 1.0, 80)]);
        let bytes = encode_voice_midi(&voice, 128).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 2);
        assert_eq!(note_ons(&smf).len(), 2);
    }

    #[test]
    fn test_zero_tempo_rejected() {
        let voice = Voice::sequential(Layer::Melody, &[(60, 1.0, 80)]);
        assert!(encode_voice_midi(&voice, 0).is_err());
    }
}
