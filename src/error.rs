//! Contains the errors returned by Keywork.

use thiserror::Error;
use ustr::Ustr;

/// An error returned when a payload or entity fails validation. Each variant names the violated
/// rule so that the storage layer can reject the write with a precise diagnostic.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ContentError {
    #[error("MIDI note {0} is outside the range 0-127")]
    MidiNoteOutOfRange(i64),

    #[error("{0:?} is not a recognized staff signature")]
    UnknownKeySignature(String),

    #[error("{0:?} is not a recognized key")]
    UnknownKey(String),

    #[error("{0:?} is not a numerator/denominator time signature")]
    BadTimeSignature(String),

    #[error("playlist {id} entry at position {position} carries order {found}")]
    BrokenOrdering {
        id: Ustr,
        position: usize,
        found: i64,
    },

    #[error("credit ordering violated: {lesser} exceeds {greater}")]
    CreditOrdering {
        lesser: &'static str,
        greater: &'static str,
    },

    #[error("{name} must lie in [0, 100], got {value}")]
    CreditOutOfRange { name: &'static str, value: f64 },

    #[error("tardy threshold must lie in [0, 4320] hours, got {0}")]
    TardyThresholdOutOfRange(i64),

    #[error("{0:?} is not a recognized error tally")]
    BadErrorTally(String),
}

/// An error returned when allocating or decoding short ids.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum IdentifierError {
    #[error("internal id {0} must be positive")]
    NonPositive(i64),

    #[error("internal id {id} cannot be represented as a short id with prefix {prefix}")]
    Overflow { prefix: char, id: i64 },
}

/// An error returned when authoring or deleting content.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum AuthoringError {
    #[error("cannot find exercise {0}")]
    UnknownExercise(Ustr),

    #[error("cannot find playlist {0}")]
    UnknownPlaylist(Ustr),

    #[error("cannot find course {0}")]
    UnknownCourse(Ustr),

    #[error("exercise {0} is locked by a recorded performance")]
    Locked(Ustr),

    #[error("cannot delete {0}: recorded performances reference it")]
    Performed(Ustr),

    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error(transparent)]
    Validation(#[from] ContentError),

    #[error("storage failure: {0}")]
    Store(#[source] anyhow::Error),
}

/// An error returned when ingesting a performance submission.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SubmissionError {
    #[error("cannot find playlist {0}")]
    UnknownPlaylist(Ustr),

    #[error("cannot find course {0}")]
    UnknownCourse(Ustr),

    #[error(transparent)]
    BadPayload(#[from] ContentError),

    #[error("cannot record attempt for playlist {0}: {1}")]
    Record(Ustr, #[source] anyhow::Error),
}

/// An error returned when updating or replaying a course's grading ledger.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum GradebookError {
    #[error("cannot find course {0}")]
    UnknownCourse(Ustr),

    #[error("cannot replay performances for course {0}: {1}")]
    Refresh(Ustr, #[source] anyhow::Error),
}
