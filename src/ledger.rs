//! Records the attempts a performer submits against a playlist and derives pass results from
//! them.
//!
//! Attempts are append-only: a submission loads the record for its `(user, playlist, course)`
//! triple, appends one stamped attempt, and saves. Everything else in this module is a pure
//! query over the recorded sequence. Passing an exercise means having at least one attempt with
//! no positive error count; passing a playlist means passing every entry of its concrete
//! expanded exercise list, and the playlist's pass date is the moment the last remaining
//! exercise was first cleared.

use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use ustr::Ustr;

use crate::{
    data::{AttemptPayload, EngineOptions, ExerciseAttempt, PerformanceData},
    error::SubmissionError,
    expander,
    gradebook,
    store::ContentStore,
};

/// The length of an exercise id without a transposition suffix.
const BASE_ID_LEN: usize = 6;

/// Strips the transposition suffix from an effective exercise id. Only the base exercise ever
/// locks or resolves in the store.
#[must_use]
pub fn base_exercise_id(effective_id: Ustr) -> Ustr {
    let text = effective_id.as_str();
    if text.len() <= BASE_ID_LEN {
        effective_id
    } else {
        Ustr::from(&text[..BASE_ID_LEN])
    }
}

impl PerformanceData {
    /// Returns the earliest time the given exercise was cleared, or `None` if every attempt at it
    /// carries a positive error count.
    #[must_use]
    pub fn exercise_first_pass(&self, exercise_id: Ustr) -> Option<NaiveDateTime> {
        self.data
            .iter()
            .filter(|attempt| attempt.id == exercise_id && attempt.error_tally.is_clear())
            .map(|attempt| attempt.performed_at)
            .min()
    }

    /// Returns the error count of the last attempt at the given exercise, with the non-graded
    /// forms normalized to zero. An exercise never attempted counts as zero.
    #[must_use]
    pub fn exercise_error_count(&self, exercise_id: Ustr) -> i64 {
        self.data
            .iter()
            .rev()
            .find(|attempt| attempt.id == exercise_id)
            .map_or(0, |attempt| attempt.error_tally.error_count())
    }

    /// Returns whether every exercise in the expanded list has been cleared at least once.
    #[must_use]
    pub fn playlist_passed(&self, exercise_list: &[Ustr]) -> bool {
        exercise_list
            .iter()
            .all(|id| self.exercise_first_pass(*id).is_some())
    }

    /// Returns the time the playlist was passed: the latest of the per-exercise first-clear
    /// times, in UTC. `None` while any exercise remains uncleared.
    #[must_use]
    pub fn playlist_pass_date(&self, exercise_list: &[Ustr]) -> Option<NaiveDateTime> {
        exercise_list
            .iter()
            .map(|id| self.exercise_first_pass(*id))
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .max()
    }

    /// Returns the playlist pass date reinterpreted in the site timezone.
    #[must_use]
    pub fn local_pass_date(
        &self,
        exercise_list: &[Ustr],
        site_offset: FixedOffset,
    ) -> Option<NaiveDateTime> {
        let pass_date = self.playlist_pass_date(exercise_list)?;
        Some(
            Utc.from_utc_datetime(&pass_date)
                .with_timezone(&site_offset)
                .naive_local(),
        )
    }

    /// Returns the total recorded duration across all attempts, in seconds.
    #[must_use]
    pub fn total_duration(&self) -> i64 {
        self.data
            .iter()
            .map(|attempt| attempt.performance_duration_in_seconds)
            .sum()
    }

    /// Returns the most recently appended attempt.
    #[must_use]
    pub fn last_attempt(&self) -> Option<&ExerciseAttempt> {
        self.data.last()
    }
}

/// Ingests one submission: appends a stamped attempt to the triple's record, feeds the course's
/// grading ledger, and locks the base exercise the first time someone other than its author
/// plays it. A grading failure is swallowed so that the recorded attempt survives; a later
/// refresh of the course recovers the ledger.
pub(crate) fn submit(
    store: &dyn ContentStore,
    options: &EngineOptions,
    user_id: Ustr,
    course_id: Option<Ustr>,
    playlist_id: Ustr,
    exercise_id: Ustr,
    payload: AttemptPayload,
    now: DateTime<Utc>,
) -> Result<PerformanceData, SubmissionError> {
    payload.error_tally.validate()?;
    let record_error = |e: anyhow::Error| SubmissionError::Record(playlist_id, e);

    store
        .get_playlist(playlist_id)
        .map_err(record_error)?
        .ok_or(SubmissionError::UnknownPlaylist(playlist_id))?;
    let mut course = match course_id {
        Some(course_id) => Some(
            store
                .get_course(course_id)
                .map_err(record_error)?
                .ok_or(SubmissionError::UnknownCourse(course_id))?,
        ),
        None => None,
    };

    // Load-append-save on the triple's record. The caller serializes submissions, so the append
    // preserves real-time order.
    let mut performance = store
        .get_performance(user_id, playlist_id, course_id)
        .map_err(record_error)?
        .unwrap_or_else(|| PerformanceData {
            user_id,
            playlist_id,
            course_id,
            data: vec![],
            updated: 0,
        });
    performance.data.push(ExerciseAttempt {
        id: exercise_id,
        error_tally: payload.error_tally,
        performed_at: now.naive_utc(),
        performance_duration_in_seconds: payload.performance_duration_in_seconds,
        tempo_rating: payload.tempo_rating,
        tempo_mean_semibreves_per_min: payload.tempo_mean_semibreves_per_min,
        extra: payload.extra,
    });
    performance.updated = now.timestamp();
    store.save_performance(&performance).map_err(record_error)?;

    // Transposed attempts reference ephemeral ids; only the stored base exercise locks.
    let base_id = base_exercise_id(exercise_id);
    if let Some(mut exercise) = store.get_exercise(base_id).map_err(record_error)? {
        if exercise.author_id != user_id && !exercise.locked {
            exercise.lock();
            store.save_exercise(&exercise).map_err(record_error)?;
        }
    }

    if let Some(course) = course.as_mut() {
        course.updated = now.timestamp();
        // Swallowed for ingest resilience; refresh_performance_dict is the recovery mechanism.
        let _ = gradebook::add_performance(store, options, course, &performance, true);
    }

    Ok(performance)
}

/// Returns the concrete exercise list used to judge the given record, resolving the playlist
/// through the store.
pub(crate) fn judged_exercise_list(
    store: &dyn ContentStore,
    options: &EngineOptions,
    playlist_id: Ustr,
) -> Result<Vec<Ustr>> {
    let playlist = store
        .get_playlist(playlist_id)?
        .ok_or_else(|| anyhow::anyhow!("cannot find playlist {playlist_id}"))?;
    Ok(expander::exercise_list(
        &playlist,
        |id| store.get_exercise(id).ok().flatten(),
        options.keyboard_fit,
    ))
}
