//! Keywork is a content engine for keyboard pedagogy. Instructors author exercises (chord
//! sequences with visible and hidden notes), group them into playlists that can replay across
//! requested key signatures, and publish playlists into courses with due dates. Performers
//! submit attempt records against playlists; the engine derives pass results from those records
//! and maintains a per-course grading ledger that classifies each pass as timely, tardy, or late
//! and scores it with the course's credit weights.
//!
//! The engine runs against a narrow storage interface and performs no I/O beyond it. All
//! transposition, expansion, and derived-query logic is pure; the mutating operations
//! (submission, grading updates, replay) run under a single write lock so that appends to one
//! attempt record stay in real-time order and course rows update atomically.

pub mod collector;
pub mod data;
pub mod error;
pub mod expander;
pub mod gradebook;
pub mod identifier;
pub mod ledger;
pub mod store;
pub mod transposer;

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use ustr::Ustr;

use crate::{
    data::{
        AttemptPayload, Course, CourseBuilder, EngineOptions, Exercise, ExerciseDefinition,
        PerformanceData, Playlist, PlaylistBuilder,
    },
    error::{AuthoringError, GradebookError, SubmissionError},
    store::{ContentStore, SqliteStore},
};

/// The sequence names backing id allocation, one per entity kind.
const EXERCISE_SEQUENCE: &str = "exercise";
const PLAYLIST_SEQUENCE: &str = "playlist";
const COURSE_SEQUENCE: &str = "course";

/// The id prefixes, one per entity kind.
const EXERCISE_PREFIX: char = 'E';
const PLAYLIST_PREFIX: char = 'P';
const COURSE_PREFIX: char = 'C';

/// The engine tying the subsystems together over one store.
pub struct Keywork {
    /// The options controlling grading, transposition, and collection behavior.
    options: EngineOptions,

    /// The store holding all authored content and attempt records.
    store: Arc<RwLock<dyn ContentStore + Send + Sync>>,
}

impl Keywork {
    /// Opens an engine over a SQLite store at the given path.
    pub fn new_from_disk(db_path: &str, options: EngineOptions) -> Result<Keywork> {
        Ok(Keywork {
            options,
            store: Arc::new(RwLock::new(SqliteStore::new_from_disk(db_path)?)),
        })
    }

    /// Opens an engine over an in-memory store.
    pub fn new_in_memory(options: EngineOptions) -> Result<Keywork> {
        Ok(Keywork {
            options,
            store: Arc::new(RwLock::new(SqliteStore::new_in_memory()?)),
        })
    }

    /// Returns the engine's options.
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Creates a new exercise for the author, allocating its id and routing it into the author's
    /// auto-playlist.
    pub fn create_exercise(
        &self,
        author_id: Ustr,
        definition: ExerciseDefinition,
    ) -> Result<Exercise, AuthoringError> {
        definition.validate()?;
        let now = Utc::now();
        let store = self.store.write();

        let sequence = store
            .next_sequence(EXERCISE_SEQUENCE)
            .map_err(AuthoringError::Store)?;
        let id = identifier::id_from_integer(EXERCISE_PREFIX, sequence)?;
        let exercise = Exercise {
            id: Ustr::from(id.as_str()),
            author_id,
            locked: false,
            definition,
            updated: now.timestamp(),
        };
        store
            .save_exercise(&exercise)
            .map_err(AuthoringError::Store)?;
        collector::collect_exercise(&*store, &self.options, author_id, exercise.id, now)
            .map_err(AuthoringError::Store)?;
        Ok(exercise)
    }

    /// Replaces an exercise's definition. Fails once the exercise is locked by a recorded
    /// performance.
    pub fn update_exercise(
        &self,
        exercise_id: Ustr,
        definition: ExerciseDefinition,
    ) -> Result<Exercise, AuthoringError> {
        definition.validate()?;
        let store = self.store.write();
        let mut exercise = store
            .get_exercise(exercise_id)
            .map_err(AuthoringError::Store)?
            .ok_or(AuthoringError::UnknownExercise(exercise_id))?;
        if exercise.locked {
            return Err(AuthoringError::Locked(exercise_id));
        }
        exercise.definition = definition;
        exercise.updated = Utc::now().timestamp();
        store
            .save_exercise(&exercise)
            .map_err(AuthoringError::Store)?;
        Ok(exercise)
    }

    /// Returns the exercise with the given id.
    pub fn get_exercise(&self, exercise_id: Ustr) -> Result<Option<Exercise>, AuthoringError> {
        self.store
            .read()
            .get_exercise(exercise_id)
            .map_err(AuthoringError::Store)
    }

    /// Deletes an exercise. A locked exercise has been performed by someone other than its
    /// author and can no longer be deleted.
    pub fn delete_exercise(&self, exercise_id: Ustr) -> Result<(), AuthoringError> {
        let store = self.store.write();
        let exercise = store
            .get_exercise(exercise_id)
            .map_err(AuthoringError::Store)?
            .ok_or(AuthoringError::UnknownExercise(exercise_id))?;
        if exercise.locked {
            return Err(AuthoringError::Performed(exercise_id));
        }
        store
            .delete_exercise(exercise_id)
            .map_err(AuthoringError::Store)
    }

    /// Creates a new empty playlist for the author.
    pub fn create_playlist(
        &self,
        author_id: Ustr,
        name: &str,
    ) -> Result<Playlist, AuthoringError> {
        let store = self.store.write();
        let sequence = store
            .next_sequence(PLAYLIST_SEQUENCE)
            .map_err(AuthoringError::Store)?;
        let id = identifier::id_from_integer(PLAYLIST_PREFIX, sequence)?;
        let playlist = PlaylistBuilder::default()
            .id(id.as_str())
            .author_id(author_id)
            .name(name)
            .updated(Utc::now().timestamp())
            .build()
            .map_err(|e| AuthoringError::Store(e.into()))?;
        store
            .save_playlist(&playlist)
            .map_err(AuthoringError::Store)?;
        Ok(playlist)
    }

    /// Saves an edited playlist after checking its ordering invariant.
    pub fn update_playlist(&self, mut playlist: Playlist) -> Result<Playlist, AuthoringError> {
        playlist.validate()?;
        let store = self.store.write();
        store
            .get_playlist(playlist.id)
            .map_err(AuthoringError::Store)?
            .ok_or(AuthoringError::UnknownPlaylist(playlist.id))?;
        playlist.updated = Utc::now().timestamp();
        store
            .save_playlist(&playlist)
            .map_err(AuthoringError::Store)?;
        Ok(playlist)
    }

    /// Returns the playlist with the given id.
    pub fn get_playlist(&self, playlist_id: Ustr) -> Result<Option<Playlist>, AuthoringError> {
        self.store
            .read()
            .get_playlist(playlist_id)
            .map_err(AuthoringError::Store)
    }

    /// Deletes a playlist unless performers other than its author have recorded attempts
    /// against it.
    pub fn delete_playlist(&self, playlist_id: Ustr) -> Result<(), AuthoringError> {
        let store = self.store.write();
        let playlist = store
            .get_playlist(playlist_id)
            .map_err(AuthoringError::Store)?
            .ok_or(AuthoringError::UnknownPlaylist(playlist_id))?;
        if store
            .playlist_performed_by_other(playlist_id, playlist.author_id)
            .map_err(AuthoringError::Store)?
        {
            return Err(AuthoringError::Performed(playlist_id));
        }
        store
            .delete_playlist(playlist_id)
            .map_err(AuthoringError::Store)
    }

    /// Creates a new course for the author.
    pub fn create_course(&self, author_id: Ustr, title: &str) -> Result<Course, AuthoringError> {
        let store = self.store.write();
        let sequence = store
            .next_sequence(COURSE_SEQUENCE)
            .map_err(AuthoringError::Store)?;
        let id = identifier::id_from_integer(COURSE_PREFIX, sequence)?;
        let course = CourseBuilder::default()
            .id(id.as_str())
            .author_id(author_id)
            .title(title)
            .updated(Utc::now().timestamp())
            .build()
            .map_err(|e| AuthoringError::Store(e.into()))?;
        course.validate()?;
        store.save_course(&course).map_err(AuthoringError::Store)?;
        Ok(course)
    }

    /// Saves an edited course after checking the credit ordering. Changing the tardy threshold
    /// rebuilds the grading ledger, since stored marks may reclassify under the new threshold.
    pub fn update_course(&self, mut course: Course) -> Result<Course, AuthoringError> {
        course.validate()?;
        let store = self.store.write();
        let stored = store
            .get_course(course.id)
            .map_err(AuthoringError::Store)?
            .ok_or(AuthoringError::UnknownCourse(course.id))?;
        course.updated = Utc::now().timestamp();
        store.save_course(&course).map_err(AuthoringError::Store)?;
        if stored.tardy_threshold != course.tardy_threshold {
            gradebook::refresh(&*store, &self.options, &mut course)
                .map_err(AuthoringError::Store)?;
        }
        Ok(course)
    }

    /// Returns the course with the given id.
    pub fn get_course(&self, course_id: Ustr) -> Result<Option<Course>, AuthoringError> {
        self.store
            .read()
            .get_course(course_id)
            .map_err(AuthoringError::Store)
    }

    /// Deletes a course unless performers other than its author have recorded attempts inside
    /// it.
    pub fn delete_course(&self, course_id: Ustr) -> Result<(), AuthoringError> {
        let store = self.store.write();
        let course = store
            .get_course(course_id)
            .map_err(AuthoringError::Store)?
            .ok_or(AuthoringError::UnknownCourse(course_id))?;
        if store
            .course_performed_by_other(course_id, course.author_id)
            .map_err(AuthoringError::Store)?
        {
            return Err(AuthoringError::Performed(course_id));
        }
        store
            .delete_course(course_id)
            .map_err(AuthoringError::Store)
    }

    /// Returns the concrete ordered list of effective exercise ids a performer plays for the
    /// playlist.
    pub fn exercise_list(&self, playlist_id: Ustr) -> Result<Vec<Ustr>, AuthoringError> {
        let store = self.store.read();
        let playlist = store
            .get_playlist(playlist_id)
            .map_err(AuthoringError::Store)?
            .ok_or(AuthoringError::UnknownPlaylist(playlist_id))?;
        Ok(expander::exercise_list(
            &playlist,
            |id| store.get_exercise(id).ok().flatten(),
            self.options.keyboard_fit,
        ))
    }

    /// Returns the effective exercise at the given 1-based position of the playlist's expansion,
    /// transposed as the expansion dictates.
    pub fn playlist_exercise(
        &self,
        playlist_id: Ustr,
        num: usize,
    ) -> Result<Option<Exercise>, AuthoringError> {
        let store = self.store.read();
        let playlist = store
            .get_playlist(playlist_id)
            .map_err(AuthoringError::Store)?
            .ok_or(AuthoringError::UnknownPlaylist(playlist_id))?;
        Ok(expander::exercise_at(
            &playlist,
            |id| store.get_exercise(id).ok().flatten(),
            self.options.keyboard_fit,
            num,
        ))
    }

    /// Ingests one performance submission, returning the saved attempt record. The appended
    /// attempt is stamped with the current time; the course's grading ledger updates as a side
    /// effect, and the base exercise locks the first time a non-author plays it.
    pub fn submit(
        &self,
        user_id: Ustr,
        course_id: Option<Ustr>,
        playlist_id: Ustr,
        exercise_id: Ustr,
        payload: AttemptPayload,
    ) -> Result<PerformanceData, SubmissionError> {
        let store = self.store.write();
        ledger::submit(
            &*store,
            &self.options,
            user_id,
            course_id,
            playlist_id,
            exercise_id,
            payload,
            Utc::now(),
        )
    }

    /// Returns the attempt record for one `(user, playlist, course)` triple.
    pub fn get_performance(
        &self,
        user_id: Ustr,
        playlist_id: Ustr,
        course_id: Option<Ustr>,
    ) -> Result<Option<PerformanceData>, SubmissionError> {
        self.store
            .read()
            .get_performance(user_id, playlist_id, course_id)
            .map_err(|e| SubmissionError::Record(playlist_id, e))
    }

    /// Rebuilds the course's grading ledger from every relevant attempt record and returns the
    /// refreshed course.
    pub fn refresh_course(&self, course_id: Ustr) -> Result<Course, GradebookError> {
        let store = self.store.write();
        let mut course = store
            .get_course(course_id)
            .map_err(|e| GradebookError::Refresh(course_id, e))?
            .ok_or(GradebookError::UnknownCourse(course_id))?;
        gradebook::refresh(&*store, &self.options, &mut course)
            .map_err(|e| GradebookError::Refresh(course_id, e))?;
        Ok(course)
    }

    /// Returns each performer's weighted score for the course.
    pub fn course_scores(&self, course_id: Ustr) -> Result<BTreeMap<Ustr, f64>, GradebookError> {
        let course = self
            .store
            .read()
            .get_course(course_id)
            .map_err(|e| GradebookError::Refresh(course_id, e))?
            .ok_or(GradebookError::UnknownCourse(course_id))?;
        Ok(course
            .performance_dict
            .iter()
            .map(|(performer, record)| {
                (
                    *performer,
                    record.score(
                        course.timely_credit,
                        course.tardy_credit,
                        course.late_credit,
                    ),
                )
            })
            .collect())
    }
}
