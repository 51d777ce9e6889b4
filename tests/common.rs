//! Shared helpers for the end-to-end tests.

use anyhow::Result;
use keywork::{
    Keywork,
    data::{
        AttemptPayload, Chord, EngineOptions, ErrorTally, Exercise, ExerciseDefinition,
        ExerciseDefinitionBuilder,
    },
};
use serde_json::Map;
use ustr::Ustr;

/// Opens an engine over an in-memory store with the default options.
pub fn new_engine() -> Result<Keywork> {
    Keywork::new_in_memory(EngineOptions::default())
}

/// Builds a one-chord C major exercise definition.
pub fn c_major_definition(visible: Vec<i64>) -> ExerciseDefinition {
    ExerciseDefinitionBuilder::default()
        .key("iC_")
        .key_signature("")
        .chords(vec![Chord {
            visible,
            hidden: vec![],
            rhythm_value: None,
        }])
        .build()
        .unwrap()
}

/// Creates a batch of simple exercises for the author and returns them in creation order.
pub fn author_exercises(engine: &Keywork, author: Ustr, count: usize) -> Result<Vec<Exercise>> {
    (0..count)
        .map(|i| {
            let definition = c_major_definition(vec![60 + i as i64, 64 + i as i64]);
            Ok(engine.create_exercise(author, definition)?)
        })
        .collect()
}

/// A clean-pass submission payload with the given duration.
pub fn clear_attempt(duration: i64) -> AttemptPayload {
    AttemptPayload {
        error_tally: ErrorTally::Count(0),
        performance_duration_in_seconds: duration,
        tempo_rating: None,
        tempo_mean_semibreves_per_min: None,
        extra: Map::new(),
    }
}

/// A failing submission payload carrying the given error count.
#[allow(dead_code)]
pub fn failed_attempt(errors: i64, duration: i64) -> AttemptPayload {
    AttemptPayload {
        error_tally: ErrorTally::Count(errors),
        performance_duration_in_seconds: duration,
        tempo_rating: None,
        tempo_mean_semibreves_per_min: None,
        extra: Map::new(),
    }
}

/// Submits clean passes for every entry of the playlist's expanded exercise list.
#[allow(dead_code)]
pub fn pass_whole_playlist(
    engine: &Keywork,
    user: Ustr,
    course: Option<Ustr>,
    playlist: Ustr,
    duration: i64,
) -> Result<()> {
    for exercise_id in engine.exercise_list(playlist)? {
        engine.submit(user, course, playlist, exercise_id, clear_attempt(duration))?;
    }
    Ok(())
}
