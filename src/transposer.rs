//! Contains the logic to transpose an exercise into a requested key.
//!
//! Transposition is a pure function from an exercise and a target key to a new exercise: the
//! returned value shares no mutable substructure with the input, and a request the engine cannot
//! honor (an unrecognized target, or a key that would fall off the end of the key table) returns
//! the input unchanged so that callers can silently skip it.

use ustr::Ustr;

use crate::data::{
    Chord, Exercise,
    music::{ALL_KEYS, NO_KEY, fifth_chain_distance, key_index, pseudo_key_signature,
        signature_pitch_class},
};

/// The search width for the keyboard-fit octave displacement, in octaves either way.
const MAX_OCTAVE_DISPLACEMENT: i64 = 7;

/// Transposes the exercise to the key requested by the given transpose-request spelling.
#[must_use]
pub fn transpose(exercise: &Exercise, target_pseudo_key: &str, keyboard_fit: bool) -> Exercise {
    match pseudo_key_signature(target_pseudo_key) {
        Some(signature) => transpose_to_signature(exercise, signature, keyboard_fit),
        None => exercise.clone(),
    }
}

/// Transposes the exercise to the key carrying the given staff signature. With `keyboard_fit`
/// off, notes shift upward within one octave; with it on, the shift also searches for an octave
/// displacement that keeps the exercise's span in a comfortable keyboard region.
#[must_use]
pub fn transpose_to_signature(
    exercise: &Exercise,
    target_signature: &str,
    keyboard_fit: bool,
) -> Exercise {
    let source_signature = exercise.definition.key_signature.clone();
    let (Some(source_pc), Some(target_pc)) = (
        signature_pitch_class(&source_signature),
        signature_pitch_class(target_signature),
    ) else {
        return exercise.clone();
    };
    let pc_vector = (i64::from(target_pc) - i64::from(source_pc)).rem_euclid(12);

    // A no-key exercise keeps its sentinel; otherwise the key label advances two positions in the
    // mode-interleaved key table per fifth moved on the staff.
    let target_key = if exercise.definition.key == NO_KEY {
        NO_KEY.to_string()
    } else {
        let Some(fifth_move) = fifth_chain_distance(&source_signature, target_signature) else {
            return exercise.clone();
        };
        let Some(source_index) = key_index(&exercise.definition.key) else {
            return exercise.clone();
        };
        let target_index = source_index as i64 + 2 * fifth_move;
        if !(0..ALL_KEYS.len() as i64).contains(&target_index) {
            return exercise.clone();
        }
        ALL_KEYS[target_index as usize].to_string()
    };

    let midi_vector = if keyboard_fit {
        match fitted_midi_vector(exercise, pc_vector) {
            Some(vector) => vector,
            None => return exercise.clone(),
        }
    } else {
        pc_vector
    };

    let mut transposed = exercise.clone();
    for chord in &mut transposed.definition.chords {
        for note in chord.visible.iter_mut().chain(chord.hidden.iter_mut()) {
            *note += midi_vector;
        }
    }
    transposed.definition.key = target_key;
    transposed.definition.key_signature = target_signature.to_string();
    let transposed_id = if midi_vector < 0 {
        format!("{}{}", exercise.id, midi_vector)
    } else {
        format!("{}+{}", exercise.id, midi_vector)
    };
    transposed.id = Ustr::from(transposed_id.as_str());
    transposed
}

/// Searches for the octave displacement that lands the exercise's pitch center in the target
/// region for its span. Returns `None` when no displacement within the search width fits.
fn fitted_midi_vector(exercise: &Exercise, pc_vector: i64) -> Option<i64> {
    let notes: Vec<i64> = exercise
        .definition
        .chords
        .iter()
        .flat_map(Chord::all_notes)
        .collect();
    let (Some(min), Some(max)) = (notes.iter().min(), notes.iter().max()) else {
        return Some(pc_vector);
    };

    let midi_mean_floor = (max + min) / 2;
    let midi_range = max - min + 1;
    let floor_target_min = match midi_range {
        ..=14 => 54,
        ..=21 => 51,
        ..=26 => 48,
        ..=38 => 54,
        ..=50 => 60,
        _ => 59,
    };

    for step in 0..=MAX_OCTAVE_DISPLACEMENT {
        for displacement in [step, -step] {
            let center = midi_mean_floor + pc_vector + 12 * displacement;
            if (floor_target_min..floor_target_min + 12).contains(&center) {
                return Some(pc_vector + 12 * displacement);
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use ustr::Ustr;

    use super::*;
    use crate::data::{Chord, ExerciseDefinitionBuilder};

    fn exercise(key: &str, signature: &str, visible: Vec<i64>) -> Exercise {
        Exercise {
            id: Ustr::from("EA00DD"),
            author_id: Ustr::from("instructor"),
            locked: false,
            definition: ExerciseDefinitionBuilder::default()
                .key(key)
                .key_signature(signature)
                .chords(vec![Chord {
                    visible,
                    hidden: vec![],
                    rhythm_value: None,
                }])
                .build()
                .unwrap(),
            updated: 0,
        }
    }

    /// Verifies a C major triad moving up to G major.
    #[test]
    fn simple_transpose() {
        let source = exercise("iC_", "", vec![60, 64, 67]);
        let transposed = transpose(&source, "G", false);
        assert_eq!(transposed.definition.key, "iG_");
        assert_eq!(transposed.definition.key_signature, "#");
        assert_eq!(transposed.definition.chords[0].visible, vec![67, 71, 74]);
        assert_eq!(transposed.id.as_str(), "EA00DD+7");
    }

    /// Verifies the minor mode survives transposition.
    #[test]
    fn minor_preserved() {
        let source = exercise("jA_", "", vec![57, 60, 64]);
        let transposed = transpose(&source, "e", false);
        assert_eq!(transposed.definition.key, "jE_");
        assert_eq!(transposed.definition.key_signature, "#");
        assert_eq!(transposed.definition.chords[0].visible, vec![64, 67, 71]);
    }

    /// Verifies the no-key sentinel passes through while the signature and notes move.
    #[test]
    fn no_key_preserved() {
        let source = exercise("h", "", vec![60, 64, 67]);
        let transposed = transpose(&source, "F", false);
        assert_eq!(transposed.definition.key, "h");
        assert_eq!(transposed.definition.key_signature, "b");
        assert_eq!(transposed.definition.chords[0].visible, vec![65, 69, 72]);
        assert_eq!(transposed.id.as_str(), "EA00DD+5");
    }

    /// Verifies an unrecognized target returns the exercise unchanged.
    #[test]
    fn unrecognized_target() {
        let source = exercise("iC_", "", vec![60, 64, 67]);
        let transposed = transpose(&source, "Q", false);
        assert_eq!(transposed, source);
    }

    /// Verifies a move that would fall off the key table returns the exercise unchanged.
    #[test]
    fn key_table_overflow() {
        let source = exercise("jC#", "####", vec![61, 64, 68]);
        let transposed = transpose(&source, "d#", false);
        assert_eq!(transposed, source);
    }

    /// Verifies transposing to the exercise's own signature only rewrites the id.
    #[test]
    fn identity_transpose() {
        let source = exercise("iC_", "", vec![60, 64, 67]);
        let transposed = transpose(&source, "C", false);
        assert_eq!(transposed.definition, source.definition);
        assert_eq!(transposed.id.as_str(), "EA00DD+0");
    }

    /// Verifies every note lands on the pitch class the chromatic vector predicts.
    #[test]
    fn pitch_class_correctness() {
        let source = exercise("iC_", "", vec![48, 55, 60, 64, 67, 72]);
        for (request, pc_vector) in [("G", 7), ("F", 5), ("Db", 1), ("b", 2)] {
            let transposed = transpose(&source, request, false);
            for (original, moved) in source.definition.chords[0]
                .visible
                .iter()
                .zip(&transposed.definition.chords[0].visible)
            {
                assert_eq!(moved.rem_euclid(12), (original + pc_vector).rem_euclid(12));
            }
        }
    }

    /// Verifies two successive transpositions land on the same pitch classes as one direct move.
    #[test]
    fn composes_modulo_id() {
        let source = exercise("iC_", "", vec![60, 64, 67]);
        let via = transpose(&transpose(&source, "G", false), "Eb", false);
        let direct = transpose(&source, "Eb", false);
        let classes = |exercise: &Exercise| -> Vec<i64> {
            exercise.definition.chords[0]
                .visible
                .iter()
                .map(|n| n.rem_euclid(12))
                .collect()
        };
        assert_eq!(classes(&via), classes(&direct));
        assert_eq!(via.definition.key, direct.definition.key);
    }

    /// Verifies the returned exercise shares no mutable substructure with the input.
    #[test]
    fn deep_clone() {
        let source = exercise("iC_", "", vec![60, 64, 67]);
        let mut transposed = transpose(&source, "G", false);
        transposed.definition.chords[0].visible[0] = 0;
        transposed.definition.chords[0].hidden.push(1);
        assert_eq!(source.definition.chords[0].visible, vec![60, 64, 67]);
        assert!(source.definition.chords[0].hidden.is_empty());
    }

    /// Verifies the keyboard fit drops a shift that would leave a narrow exercise too high.
    #[test]
    fn keyboard_fit_displaces_octave() {
        // Span 8 targets the region starting at 54; the raw shift to 70 overshoots, so the fit
        // settles one octave down.
        let source = exercise("iC_", "", vec![60, 64, 67]);
        let transposed = transpose(&source, "G", true);
        assert_eq!(transposed.definition.chords[0].visible, vec![55, 59, 62]);
        assert_eq!(transposed.id.as_str(), "EA00DD-5");
    }
}
