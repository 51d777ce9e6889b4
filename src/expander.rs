//! Turns a playlist's stored structure into the concrete ordered exercise sequence a performer
//! plays.
//!
//! A playlist stores its exercises once, plus a list of transpose-requests and a transposition
//! mode. Expansion crosses the stored order with the requested target signatures: exercise-loop
//! plays each exercise in every key before moving on, playlist-loop plays the whole list once per
//! key. Requests that map to the same staff signature are collapsed to the first occurrence,
//! since replaying an exercise in the same key would produce colliding attempt ids.

use ustr::Ustr;

use crate::{
    data::{Exercise, Playlist, TranspositionMode, music::pseudo_key_signature},
    transposer::transpose_to_signature,
};

/// Returns the distinct target signatures for the playlist's transpose-requests, preserving
/// first-seen order. Unrecognized requests are silently omitted.
#[must_use]
pub fn requested_signatures(playlist: &Playlist) -> Vec<&'static str> {
    let mut signatures = Vec::new();
    for request in &playlist.transpose_requests {
        if let Some(signature) = pseudo_key_signature(request) {
            if !signatures.contains(&signature) {
                signatures.push(signature);
            }
        }
    }
    signatures
}

/// Returns the expansion pairs in play order: each stored exercise id with the signature it will
/// be transposed to, or `None` where the exercise plays in its original key.
#[must_use]
pub fn expansion_matrix(playlist: &Playlist) -> Vec<(Ustr, Option<&'static str>)> {
    let mut entries = playlist.entries.clone();
    entries.sort_by_key(|entry| entry.order);
    let base: Vec<Ustr> = entries.iter().map(|entry| entry.exercise_id).collect();

    let signatures = requested_signatures(playlist);
    if playlist.transposition_type == TranspositionMode::Off || signatures.is_empty() {
        return base.into_iter().map(|id| (id, None)).collect();
    }

    match playlist.transposition_type {
        TranspositionMode::ExerciseLoop => base
            .iter()
            .flat_map(|id| signatures.iter().map(|signature| (*id, Some(*signature))))
            .collect(),
        TranspositionMode::PlaylistLoop => signatures
            .iter()
            .flat_map(|signature| base.iter().map(|id| (*id, Some(*signature))))
            .collect(),
        TranspositionMode::Off => unreachable!(),
    }
}

/// Returns the concrete ordered list of effective exercise ids. Entries whose base exercise
/// cannot be resolved keep their stored id.
pub fn exercise_list<R>(playlist: &Playlist, resolve: R, keyboard_fit: bool) -> Vec<Ustr>
where
    R: Fn(Ustr) -> Option<Exercise>,
{
    expansion_matrix(playlist)
        .into_iter()
        .map(|(id, signature)| match (signature, resolve(id)) {
            (Some(signature), Some(exercise)) => {
                transpose_to_signature(&exercise, signature, keyboard_fit).id
            }
            _ => id,
        })
        .collect()
}

/// Returns the effective exercise at the given 1-based position, transposed as the expansion
/// dictates. Oversized positions clamp to the last entry; position zero and an empty playlist
/// yield `None`.
pub fn exercise_at<R>(
    playlist: &Playlist,
    resolve: R,
    keyboard_fit: bool,
    num: usize,
) -> Option<Exercise>
where
    R: Fn(Ustr) -> Option<Exercise>,
{
    let matrix = expansion_matrix(playlist);
    if num == 0 || matrix.is_empty() {
        return None;
    }
    let (id, signature) = matrix[num.min(matrix.len()) - 1];
    let exercise = resolve(id)?;
    Some(match signature {
        Some(signature) => transpose_to_signature(&exercise, signature, keyboard_fit),
        None => exercise,
    })
}

/// Returns the first 1-based position, or `None` for an empty expansion.
#[must_use]
pub fn first(count: usize) -> Option<usize> {
    if count == 0 { None } else { Some(1) }
}

/// Returns the last 1-based position, or `None` for an empty expansion.
#[must_use]
pub fn last(count: usize) -> Option<usize> {
    if count == 0 { None } else { Some(count) }
}

/// Returns the position after `num`, clamped to the last entry.
#[must_use]
pub fn next_num(count: usize, num: usize) -> usize {
    (num + 1).clamp(1, count.max(1))
}

/// Returns the position before `num`, clamped to the first entry.
#[must_use]
pub fn prev_num(count: usize, num: usize) -> usize {
    num.saturating_sub(1).clamp(1, count.max(1))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use ustr::Ustr;

    use super::*;
    use crate::data::{Chord, ExerciseDefinitionBuilder, PlaylistBuilder, PlaylistEntry};

    fn exercise(id: &str) -> Exercise {
        Exercise {
            id: Ustr::from(id),
            author_id: Ustr::from("instructor"),
            locked: false,
            definition: ExerciseDefinitionBuilder::default()
                .key("iC_")
                .key_signature("")
                .chords(vec![Chord {
                    visible: vec![60, 64, 67],
                    hidden: vec![],
                    rhythm_value: None,
                }])
                .build()
                .unwrap(),
            updated: 0,
        }
    }

    fn playlist(mode: TranspositionMode, requests: &[&str]) -> Playlist {
        PlaylistBuilder::default()
            .id("PA00A0")
            .author_id("instructor")
            .name("Week 1")
            .entries(vec![
                PlaylistEntry {
                    exercise_id: Ustr::from("EA00A0"),
                    order: 1,
                },
                PlaylistEntry {
                    exercise_id: Ustr::from("EA00A1"),
                    order: 2,
                },
            ])
            .transpose_requests(requests.iter().map(|r| r.to_string()).collect::<Vec<_>>())
            .transposition_type(mode)
            .build()
            .unwrap()
    }

    fn resolve(id: Ustr) -> Option<Exercise> {
        Some(exercise(id.as_str()))
    }

    /// Verifies duplicate and unrecognized requests collapse to distinct signatures in first-seen
    /// order.
    #[test]
    fn distinct_signatures() {
        let playlist = playlist(
            TranspositionMode::ExerciseLoop,
            &["C", "G", "Db", "Db", "Q"],
        );
        assert_eq!(requested_signatures(&playlist), vec!["", "#", "bbbbb"]);
    }

    /// Verifies exercise-loop order: every key for one exercise before the next exercise.
    #[test]
    fn exercise_loop_order() {
        let playlist = playlist(TranspositionMode::ExerciseLoop, &["C", "G", "Db", "Db"]);
        let list = exercise_list(&playlist, resolve, false);
        let expected: Vec<Ustr> = [
            "EA00A0+0", "EA00A0+7", "EA00A0+1", "EA00A1+0", "EA00A1+7", "EA00A1+1",
        ]
        .iter()
        .map(|id| Ustr::from(*id))
        .collect();
        assert_eq!(list, expected);
    }

    /// Verifies playlist-loop order: the whole list once per key.
    #[test]
    fn playlist_loop_order() {
        let playlist = playlist(TranspositionMode::PlaylistLoop, &["C", "G", "Db", "Db"]);
        let list = exercise_list(&playlist, resolve, false);
        let expected: Vec<Ustr> = [
            "EA00A0+0", "EA00A1+0", "EA00A0+7", "EA00A1+7", "EA00A0+1", "EA00A1+1",
        ]
        .iter()
        .map(|id| Ustr::from(*id))
        .collect();
        assert_eq!(list, expected);
    }

    /// Verifies the expansion never repeats a `(base, signature)` pair.
    #[test]
    fn expansion_distinctness() {
        let playlist = playlist(
            TranspositionMode::ExerciseLoop,
            &["C", "G", "Db", "Db", "bb", "a"],
        );
        let matrix = expansion_matrix(&playlist);
        for (index, pair) in matrix.iter().enumerate() {
            assert!(!matrix[index + 1..].contains(pair), "duplicate {pair:?}");
        }
    }

    /// Verifies transposition off returns the stored order untouched.
    #[test]
    fn off_returns_base() {
        let playlist = playlist(TranspositionMode::Off, &["G"]);
        let list = exercise_list(&playlist, resolve, false);
        assert_eq!(list, vec![Ustr::from("EA00A0"), Ustr::from("EA00A1")]);
    }

    /// Verifies navigation clamping at both ends.
    #[test]
    fn navigation_clamps() {
        assert_eq!(first(6), Some(1));
        assert_eq!(last(6), Some(6));
        assert_eq!(first(0), None);
        assert_eq!(last(0), None);
        assert_eq!(next_num(6, 6), 6);
        assert_eq!(next_num(6, 2), 3);
        assert_eq!(prev_num(6, 1), 1);
        assert_eq!(prev_num(6, 4), 3);
    }

    /// Verifies position lookup clamps oversized positions and rejects the degenerate ones.
    #[test]
    fn position_lookup() {
        let playlist = playlist(TranspositionMode::ExerciseLoop, &["C", "G"]);
        let found = exercise_at(&playlist, resolve, false, 99).unwrap();
        assert_eq!(found.id.as_str(), "EA00A1+7");
        assert!(exercise_at(&playlist, resolve, false, 0).is_none());

        let empty = PlaylistBuilder::default()
            .id("PA00A1")
            .author_id("instructor")
            .name("Empty")
            .build()
            .unwrap();
        assert!(exercise_at(&empty, resolve, false, 1).is_none());
    }
}
