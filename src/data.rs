//! Defines the basic data structures used by Keywork to describe exercises, playlists, and
//! courses, to store the attempts a performer submits against a playlist, and to hold the options
//! that control the engine's behavior.
//!
//! The authored exercise payload keeps its fields in a fixed canonical order; the struct fields
//! below are declared in that order so that serialization emits it without further work. Unknown
//! payload keys are preserved in an ordered extension map to keep authoring flexibility.

pub mod music;

use std::collections::BTreeMap;

use chrono::{Duration, FixedOffset, NaiveDateTime};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use ustr::Ustr;

use crate::error::ContentError;

/// Serialization helpers for the stored timestamp text form `YYYY-MM-DD HH:MM:SS`.
pub mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    /// The text form of every stored timestamp.
    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    #[allow(missing_docs)]
    pub fn serialize<S: Serializer>(
        value: &NaiveDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    #[allow(missing_docs)]
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&text, FORMAT).map_err(serde::de::Error::custom)
    }

    /// The same text form for optional timestamps.
    pub mod option {
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        #[allow(missing_docs)]
        pub fn serialize<S: Serializer>(
            value: &Option<NaiveDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => {
                    serializer.serialize_str(&value.format(super::FORMAT).to_string())
                }
                None => serializer.serialize_none(),
            }
        }

        #[allow(missing_docs)]
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            let text: Option<String> = Option::deserialize(deserializer)?;
            match text {
                Some(text) => NaiveDateTime::parse_from_str(&text, super::FORMAT)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

/// The rhythm value a chord can carry. Uppercase variants are dotted.
#[derive(Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, PartialEq, Serialize)]
#[allow(missing_docs)]
pub enum Rhythm {
    #[serde(rename = "w")]
    #[strum(serialize = "w")]
    Whole,

    #[serde(rename = "W")]
    #[strum(serialize = "W")]
    DottedWhole,

    #[serde(rename = "h")]
    #[strum(serialize = "h")]
    Half,

    #[serde(rename = "H")]
    #[strum(serialize = "H")]
    DottedHalf,

    #[serde(rename = "q")]
    #[strum(serialize = "q")]
    Quarter,

    #[serde(rename = "Q")]
    #[strum(serialize = "Q")]
    DottedQuarter,
}

impl Rhythm {
    /// Normalizes one raw rhythm token. The numeric note values `1`, `2`, and `4` map to whole,
    /// half, and quarter; any token outside the recognized set is discarded.
    #[must_use]
    pub fn normalize(token: &str) -> Option<Rhythm> {
        match token {
            "1" | "w" => Some(Rhythm::Whole),
            "W" => Some(Rhythm::DottedWhole),
            "2" | "h" => Some(Rhythm::Half),
            "H" => Some(Rhythm::DottedHalf),
            "4" | "q" => Some(Rhythm::Quarter),
            "Q" => Some(Rhythm::DottedQuarter),
            _ => None,
        }
    }
}

/// One time-step in an exercise: the notes sounding at that step, split into the notes shown on
/// the staff and the notes the performer must supply unprompted.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Chord {
    /// The MIDI note numbers printed on the staff.
    #[serde(default)]
    pub visible: Vec<i64>,

    /// The MIDI note numbers hidden from the staff.
    #[serde(default)]
    pub hidden: Vec<i64>,

    /// The rhythm value assigned to this step, if the exercise carries a rhythm.
    #[serde(rename = "rhythmValue", default, skip_serializing_if = "Option::is_none")]
    pub rhythm_value: Option<Rhythm>,
}

impl Chord {
    /// Returns every note in the chord, visible and hidden.
    pub fn all_notes(&self) -> impl Iterator<Item = i64> + '_ {
        self.visible.iter().chain(self.hidden.iter()).copied()
    }
}

/// The authored musical payload of an exercise. Field declaration order is the canonical payload
/// order, so serializing a definition always emits the canonical form.
#[derive(Builder, Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ExerciseDefinition {
    /// The presentation type of the exercise.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub presentation_type: Option<String>,

    /// Text shown to the performer before the exercise.
    #[serde(rename = "introText", default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub intro_text: Option<String>,

    /// Text shown to the performer after the exercise.
    #[serde(rename = "reviewText", default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub review_text: Option<String>,

    /// How the notes are distributed across the staves.
    #[serde(
        rename = "staffDistribution",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    #[builder(default)]
    pub staff_distribution: Option<String>,

    /// The key code of the original key, or the sentinel [`music::NO_KEY`].
    #[builder(setter(into))]
    pub key: String,

    /// The staff signature of the original key.
    #[serde(rename = "keySignature")]
    #[builder(setter(into))]
    pub key_signature: String,

    /// Authored analysis annotations, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub analysis: Option<Value>,

    /// Authored highlight annotations, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub highlight: Option<Value>,

    /// The ordered chord sequence.
    #[serde(rename = "chord")]
    pub chords: Vec<Chord>,

    /// The optional meter, written `numerator/denominator`.
    #[serde(
        rename = "timeSignature",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    #[builder(default)]
    pub time_signature: Option<String>,

    /// How many semibreves of music to lay out per line.
    #[serde(
        rename = "semibrevesPerLine",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    #[builder(default)]
    pub semibreves_per_line: Option<i64>,

    /// Unrecognized payload keys, preserved in authored order.
    #[serde(flatten)]
    #[builder(default)]
    pub extra: Map<String, Value>,
}

impl ExerciseDefinition {
    /// Normalizes the raw rhythm text and assigns the resulting values left-to-right across the
    /// chords. Unrecognized tokens are discarded, the token list is truncated to the number of
    /// chords, and a non-empty list shorter than the chord sequence is padded with whole notes.
    /// An empty result clears the rhythm from every chord.
    pub fn set_rhythm(&mut self, raw: &str) {
        let mut tokens: Vec<Rhythm> = raw
            .split_whitespace()
            .filter_map(Rhythm::normalize)
            .collect();
        tokens.truncate(self.chords.len());
        if tokens.is_empty() {
            for chord in &mut self.chords {
                chord.rhythm_value = None;
            }
            return;
        }
        while tokens.len() < self.chords.len() {
            tokens.push(Rhythm::Whole);
        }
        for (chord, token) in self.chords.iter_mut().zip(tokens) {
            chord.rhythm_value = Some(token);
        }
    }

    /// Serializes the definition into its canonical payload form: the fixed top-level field order
    /// followed by any extension keys in authored order.
    pub fn canonical_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Checks the payload invariants: every note within the MIDI range, a recognized staff
    /// signature, a recognized key code (or the no-key sentinel), and a well-formed meter.
    pub fn validate(&self) -> Result<(), ContentError> {
        for chord in &self.chords {
            for note in chord.all_notes() {
                if !(0..=127).contains(&note) {
                    return Err(ContentError::MidiNoteOutOfRange(note));
                }
            }
        }
        if music::signature_index(&self.key_signature).is_none() {
            return Err(ContentError::UnknownKeySignature(
                self.key_signature.clone(),
            ));
        }
        if self.key != music::NO_KEY && music::key_index(&self.key).is_none() {
            return Err(ContentError::UnknownKey(self.key.clone()));
        }
        if let Some(meter) = &self.time_signature {
            let mut parts = meter.splitn(2, '/');
            let well_formed = matches!(
                (parts.next(), parts.next()),
                (Some(n), Some(d)) if n.parse::<u32>().is_ok() && d.parse::<u32>().is_ok()
            );
            if !well_formed {
                return Err(ContentError::BadTimeSignature(meter.clone()));
            }
        }
        Ok(())
    }
}

/// An authored exercise. The definition is immutable once any performer other than the author has
/// recorded an attempt against it; the lock never resets.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Exercise {
    /// The short id assigned to this exercise, prefix `E`.
    pub id: Ustr,

    /// The id of the author.
    pub author_id: Ustr,

    /// Whether the exercise is permanently locked against edits.
    pub locked: bool,

    /// The authored payload.
    pub definition: ExerciseDefinition,

    /// The time of the last save, as unix seconds.
    pub updated: i64,
}

impl Exercise {
    /// Locks the exercise. Idempotent; there is no unlock.
    pub fn lock(&mut self) {
        self.locked = true;
    }
}

/// How a playlist combines its transpose-requests with its exercises.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, EnumString, Eq, PartialEq, Serialize,
)]
pub enum TranspositionMode {
    /// No transposition; the stored order is the played order.
    #[default]
    #[serde(rename = "off")]
    #[strum(serialize = "off")]
    Off,

    /// Each exercise is played in every requested key before moving to the next exercise.
    #[serde(rename = "exercise-loop")]
    #[strum(serialize = "exercise-loop")]
    ExerciseLoop,

    /// The whole playlist is played through once per requested key.
    #[serde(rename = "playlist-loop")]
    #[strum(serialize = "playlist-loop")]
    PlaylistLoop,
}

/// One exercise's position in a playlist.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PlaylistEntry {
    /// The id of the exercise.
    pub exercise_id: Ustr,

    /// The 1-based position.
    pub order: i64,
}

/// An ordered collection of exercises, optionally replayed across requested keys.
#[derive(Builder, Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Playlist {
    /// The short id assigned to this playlist, prefix `P`.
    #[builder(setter(into))]
    pub id: Ustr,

    /// The id of the author.
    #[builder(setter(into))]
    pub author_id: Ustr,

    /// The display name.
    #[builder(setter(into))]
    pub name: String,

    /// The ordered exercise references. Orders form a contiguous 1-based sequence.
    #[builder(default)]
    pub entries: Vec<PlaylistEntry>,

    /// The requested target keys, as transpose-request spellings.
    #[builder(default)]
    pub transpose_requests: Vec<String>,

    /// The transposition mode.
    #[builder(default)]
    pub transposition_type: TranspositionMode,

    /// Whether the playlist is visible beyond its author.
    #[builder(default)]
    pub is_public: bool,

    /// Whether the playlist was opened automatically to collect new exercises.
    #[builder(default)]
    pub is_auto: bool,

    /// The time of the last save, as unix seconds.
    #[builder(default)]
    pub updated: i64,
}

impl Playlist {
    /// Appends an exercise at the next position.
    pub fn push_exercise(&mut self, exercise_id: Ustr) {
        let order = self.entries.len() as i64 + 1;
        self.entries.push(PlaylistEntry { exercise_id, order });
    }

    /// Checks that the entry orders form a contiguous 1-based sequence.
    pub fn validate(&self) -> Result<(), ContentError> {
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.order != index as i64 + 1 {
                return Err(ContentError::BrokenOrdering {
                    id: self.id,
                    position: index + 1,
                    found: entry.order,
                });
            }
        }
        Ok(())
    }
}

/// One playlist's position in a course, with the dates that drive grading. Dates are naive and
/// interpreted in the configured site timezone.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CoursePlaylistEntry {
    /// The id of the playlist.
    pub playlist_id: Ustr,

    /// The 1-based position.
    pub order: i64,

    /// When the playlist becomes visible to performers.
    #[serde(with = "timestamp::option", default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<NaiveDateTime>,

    /// When the playlist is due.
    #[serde(with = "timestamp::option", default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDateTime>,
}

/// The pass-mark a performer holds for one playlist in a course. The variant order is the
/// upgrade order: a mark never moves backward.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum PassMark {
    /// Not passed.
    #[serde(rename = "X")]
    #[strum(serialize = "X")]
    Incomplete,

    /// Passed, but the playlist carries no due date.
    #[serde(rename = "C")]
    #[strum(serialize = "C")]
    Completed,

    /// Passed more than the tardy threshold after the due date.
    #[serde(rename = "L")]
    #[strum(serialize = "L")]
    Late,

    /// Passed after the due date but within the tardy threshold.
    #[serde(rename = "T")]
    #[strum(serialize = "T")]
    Tardy,

    /// Passed on time.
    #[serde(rename = "P")]
    #[strum(serialize = "P")]
    Timely,
}

/// One performer's row in a course's grading ledger.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PerformerRecord {
    /// The pass-mark held for each playlist.
    #[serde(default)]
    pub marks: BTreeMap<Ustr, PassMark>,

    /// Total seconds of recorded practice.
    #[serde(default)]
    pub time_elapsed: i64,

    /// Whether `time_elapsed` has been rebuilt from the full attempt history. Until this is set,
    /// the next grading update recomputes the total instead of incrementing it.
    #[serde(default)]
    pub reset: bool,
}

impl PerformerRecord {
    /// Scores the row with the course's credit weights. Timely and no-due-date passes earn the
    /// timely credit; incomplete playlists contribute nothing.
    #[must_use]
    pub fn score(&self, timely_credit: f64, tardy_credit: f64, late_credit: f64) -> f64 {
        self.marks
            .values()
            .map(|mark| match mark {
                PassMark::Timely | PassMark::Completed => timely_credit,
                PassMark::Tardy => tardy_credit,
                PassMark::Late => late_credit,
                PassMark::Incomplete => 0.0,
            })
            .sum()
    }
}

/// A published sequence of playlists graded against due dates.
#[derive(Builder, Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Course {
    /// The short id assigned to this course, prefix `C`.
    #[builder(setter(into))]
    pub id: Ustr,

    /// The id of the author.
    #[builder(setter(into))]
    pub author_id: Ustr,

    /// The display title.
    #[builder(setter(into))]
    pub title: String,

    /// Whether the course is open for submissions.
    #[builder(default = "true")]
    pub open: bool,

    /// The named user groups the course is visible to.
    #[builder(default)]
    pub visible_to: Vec<String>,

    /// The ordered playlist references with their publish and due dates.
    #[builder(default)]
    pub playlists: Vec<CoursePlaylistEntry>,

    /// Credit for a timely pass, in points.
    #[builder(default = "100.0")]
    pub timely_credit: f64,

    /// Credit for a tardy pass, in points.
    #[builder(default = "50.0")]
    pub tardy_credit: f64,

    /// Credit for a late pass, in points.
    #[builder(default = "25.0")]
    pub late_credit: f64,

    /// Hours past the due date within which a pass still counts as tardy rather than late.
    #[builder(default = "120")]
    pub tardy_threshold: i64,

    /// The grading ledger, keyed by performer id.
    #[builder(default)]
    pub performance_dict: BTreeMap<Ustr, PerformerRecord>,

    /// The time of the last save, as unix seconds.
    #[builder(default)]
    pub updated: i64,
}

impl Course {
    /// Returns the course entry for the given playlist, if the playlist is part of this course.
    #[must_use]
    pub fn playlist_entry(&self, playlist_id: Ustr) -> Option<&CoursePlaylistEntry> {
        self.playlists
            .iter()
            .find(|entry| entry.playlist_id == playlist_id)
    }

    /// Checks the credit ordering and the tardy-threshold range, naming the violated rule.
    pub fn validate(&self) -> Result<(), ContentError> {
        for (name, credit) in [
            ("timely_credit", self.timely_credit),
            ("tardy_credit", self.tardy_credit),
            ("late_credit", self.late_credit),
        ] {
            if !(0.0..=100.0).contains(&credit) {
                return Err(ContentError::CreditOutOfRange { name, value: credit });
            }
        }
        if self.late_credit > self.tardy_credit {
            return Err(ContentError::CreditOrdering {
                lesser: "late_credit",
                greater: "tardy_credit",
            });
        }
        if self.tardy_credit > self.timely_credit {
            return Err(ContentError::CreditOrdering {
                lesser: "tardy_credit",
                greater: "timely_credit",
            });
        }
        if self.late_credit > self.timely_credit {
            return Err(ContentError::CreditOrdering {
                lesser: "late_credit",
                greater: "timely_credit",
            });
        }
        if !(0..=4320).contains(&self.tardy_threshold) {
            return Err(ContentError::TardyThresholdOutOfRange(self.tardy_threshold));
        }
        Ok(())
    }
}

/// The tally a performer's client reports for one attempt. Zero is a clean pass, `-1` a non-graded
/// completion, positive values count errors, and the legacy text form `n/a` reads as non-graded.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ErrorTally {
    /// A numeric tally.
    Count(i64),

    /// The legacy text sentinel.
    Sentinel(String),
}

impl ErrorTally {
    /// Returns whether the attempt clears the exercise, that is, carries no positive error count.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        match self {
            ErrorTally::Count(count) => *count <= 0,
            ErrorTally::Sentinel(text) => text == "n/a",
        }
    }

    /// Returns the error count with the non-graded forms normalized to zero.
    #[must_use]
    pub fn error_count(&self) -> i64 {
        match self {
            ErrorTally::Count(count) if *count > 0 => *count,
            _ => 0,
        }
    }

    /// Rejects tallies outside the recognized forms.
    pub fn validate(&self) -> Result<(), ContentError> {
        match self {
            ErrorTally::Count(count) if *count >= -1 => Ok(()),
            ErrorTally::Sentinel(text) if text == "n/a" => Ok(()),
            ErrorTally::Count(count) => Err(ContentError::BadErrorTally(count.to_string())),
            ErrorTally::Sentinel(text) => Err(ContentError::BadErrorTally(text.clone())),
        }
    }
}

/// The client-supplied body of one submission. The server stamps the exercise id and the
/// submission time itself.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AttemptPayload {
    /// The reported error tally.
    pub error_tally: ErrorTally,

    /// How long the attempt took, in seconds.
    pub performance_duration_in_seconds: i64,

    /// An optional client-rendered tempo rating, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_rating: Option<Value>,

    /// The mean tempo of the attempt, in semibreves per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_mean_semibreves_per_min: Option<f64>,

    /// Unrecognized submission keys, preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One recorded attempt at one exercise.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ExerciseAttempt {
    /// The effective exercise id played, including any transposition suffix.
    pub id: Ustr,

    /// The reported error tally.
    pub error_tally: ErrorTally,

    /// When the attempt was recorded, in UTC.
    #[serde(with = "timestamp")]
    pub performed_at: NaiveDateTime,

    /// How long the attempt took, in seconds.
    pub performance_duration_in_seconds: i64,

    /// An optional client-rendered tempo rating, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_rating: Option<Value>,

    /// The mean tempo of the attempt, in semibreves per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_mean_semibreves_per_min: Option<f64>,

    /// Unrecognized submission keys, preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The append-only attempt record for one `(user, playlist, course)` triple. The course id is
/// absent when the performer plays the playlist outside any course.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PerformanceData {
    /// The id of the performer.
    pub user_id: Ustr,

    /// The id of the playlist.
    pub playlist_id: Ustr,

    /// The id of the course, if the playlist was played inside one.
    pub course_id: Option<Ustr>,

    /// The recorded attempts, in submission order.
    pub data: Vec<ExerciseAttempt>,

    /// The time of the last save, as unix seconds.
    pub updated: i64,
}

/// Options controlling the engine's behavior.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// The fixed offset of the site timezone. Course dates are naive values in this zone;
    /// submission timestamps are naive UTC and cross over only at the grading decision point.
    pub site_offset: FixedOffset,

    /// Whether transposition searches for an octave displacement that fits the keyboard. When
    /// off, transposition shifts upward within one octave.
    pub keyboard_fit: bool,

    /// How long an auto-playlist keeps collecting new exercises.
    pub auto_playlist_window: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            site_offset: FixedOffset::east_opt(0).unwrap(),
            keyboard_fit: false,
            auto_playlist_window: Duration::hours(8),
        }
    }
}
