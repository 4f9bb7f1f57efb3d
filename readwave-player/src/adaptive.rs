//! Adaptive crossfade duration
//!
//! Transition length is shaped by the musical content of the two tracks:
//! large tempo jumps and strong mood shifts get longer overlaps, and the
//! journey's opening and finale transitions are floored at generous lengths
//! so the bookends of a reading session never feel abrupt.

use readwave_common::Track;

/// Tempo difference (BPM) above which the long bonus applies
const TEMPO_DIFF_LARGE: f32 = 30.0;
/// Tempo difference (BPM) above which the short bonus applies
const TEMPO_DIFF_MEDIUM: f32 = 20.0;

const TEMPO_BONUS_LARGE_MS: u64 = 2_000;
const TEMPO_BONUS_MEDIUM_MS: u64 = 1_000;

/// Minimum fade when leaving the first track of a session
const FIRST_TRACK_FLOOR_MS: u64 = 8_000;
/// Minimum fade when entering the final track of a session
const FINAL_TRACK_FLOOR_MS: u64 = 10_000;

/// Mood transitions that warrant a longer overlap, looked up symmetrically
/// (A→B or B→A).
const MOOD_TRANSITIONS: &[(&str, &str, u64)] = &[
    ("calm", "energetic", 2_000),
    ("melancholic", "joyful", 1_500),
    ("contemplative", "upbeat", 2_000),
    ("peaceful", "dramatic", 2_500),
];

/// Compute the crossfade duration in milliseconds for the transition from
/// the track at `from_index` into the track at `to_index`.
///
/// Tempo and mood bonuses are additive on top of `base_ms`; the first-track
/// and final-track floors are maxed against the running total, not added.
/// The result is therefore never below `base_ms`.
pub fn crossfade_duration_ms(
    current: &Track,
    next: &Track,
    base_ms: u64,
    from_index: usize,
    to_index: usize,
    playlist_len: usize,
) -> u64 {
    let mut duration = base_ms;

    if let (Some(current_tempo), Some(next_tempo)) = (current.tempo, next.tempo) {
        let tempo_diff = (current_tempo - next_tempo).abs();
        if tempo_diff > TEMPO_DIFF_LARGE {
            duration += TEMPO_BONUS_LARGE_MS;
        } else if tempo_diff > TEMPO_DIFF_MEDIUM {
            duration += TEMPO_BONUS_MEDIUM_MS;
        }
    }

    if let (Some(current_mood), Some(next_mood)) = (current.mood.as_deref(), next.mood.as_deref()) {
        duration += mood_bonus_ms(current_mood, next_mood);
    }

    // Opening transition: leaving the very first track
    if from_index == 0 {
        duration = duration.max(FIRST_TRACK_FLOOR_MS);
    }

    // Finale transition: entering the last track
    if playlist_len > 0 && to_index == playlist_len - 1 {
        duration = duration.max(FINAL_TRACK_FLOOR_MS);
    }

    duration
}

fn mood_bonus_ms(from: &str, to: &str) -> u64 {
    MOOD_TRANSITIONS
        .iter()
        .find(|(a, b, _)| (*a == from && *b == to) || (*a == to && *b == from))
        .map(|(_, _, bonus)| *bonus)
        .unwrap_or(0)
}
