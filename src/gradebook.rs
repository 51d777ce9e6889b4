//! Maintains each course's grading ledger: a pass-mark per performer per playlist plus the
//! performer's cumulative practice time.
//!
//! A pass attempt is classified against the playlist's due date in the site timezone. The hour
//! difference truncates toward zero, so a pass landing within the first hour after the deadline
//! still reads as timely. Marks only ever upgrade along `X < C < L < T < P`, which makes
//! concurrent updates commutative; when a grading parameter changes, the ledger is rebuilt by
//! replaying every relevant record in update order.

use anyhow::Result;
use chrono::NaiveDateTime;
use ustr::Ustr;

use crate::{
    data::{Course, EngineOptions, PassMark, PerformanceData},
    ledger,
    store::ContentStore,
};

/// Classifies a pass against the playlist's due date. `local_pass_date` is `None` while the
/// playlist is not passed.
#[must_use]
pub fn classify(
    due_date: Option<NaiveDateTime>,
    local_pass_date: Option<NaiveDateTime>,
    tardy_threshold: i64,
    passed: bool,
) -> PassMark {
    if !passed {
        return PassMark::Incomplete;
    }
    let (Some(due_date), Some(pass_date)) = (due_date, local_pass_date) else {
        return PassMark::Completed;
    };
    if pass_date <= due_date {
        return PassMark::Timely;
    }
    let diff_hours = (pass_date - due_date).num_hours();
    if diff_hours == 0 {
        PassMark::Timely
    } else if diff_hours < tardy_threshold {
        PassMark::Tardy
    } else {
        PassMark::Late
    }
}

/// Feeds one attempt record into the course's grading ledger. A record whose playlist is not
/// part of the course is a no-op. When `commit` is set the course is saved afterward; replay
/// passes `false` and saves once at the end.
pub(crate) fn add_performance(
    store: &dyn ContentStore,
    options: &EngineOptions,
    course: &mut Course,
    performance: &PerformanceData,
    commit: bool,
) -> Result<()> {
    let Some(entry) = course.playlist_entry(performance.playlist_id) else {
        return Ok(());
    };
    let due_date = entry.due_date;

    let exercise_list = ledger::judged_exercise_list(store, options, performance.playlist_id)?;
    let passed = performance.playlist_passed(&exercise_list);
    let pass_date = performance.local_pass_date(&exercise_list, options.site_offset);
    let mark = classify(due_date, pass_date, course.tardy_threshold, passed);

    let record = course
        .performance_dict
        .entry(performance.user_id)
        .or_default();
    let held = record
        .marks
        .entry(performance.playlist_id)
        .or_insert(PassMark::Incomplete);
    *held = mark.max(*held);

    // Until the reset sentinel is set, the total is rebuilt from the full attempt history; after
    // that each update adds only the latest attempt.
    if record.reset {
        record.time_elapsed += performance
            .last_attempt()
            .map_or(0, |attempt| attempt.performance_duration_in_seconds);
    } else {
        record.time_elapsed = performance.total_duration();
        record.reset = true;
    }

    if commit {
        store.save_course(course)?;
    }
    Ok(())
}

/// Rebuilds the course's grading ledger from scratch by replaying every record submitted inside
/// the course, plus every course-less record against one of its playlists, in update order.
/// Must run whenever the tardy threshold or another scoring parameter changes.
pub(crate) fn refresh(
    store: &dyn ContentStore,
    options: &EngineOptions,
    course: &mut Course,
) -> Result<()> {
    course.performance_dict.clear();
    let playlist_ids: Vec<Ustr> = course
        .playlists
        .iter()
        .map(|entry| entry.playlist_id)
        .collect();
    let records = store.performances_for_course(course.id, &playlist_ids)?;
    for record in &records {
        add_performance(store, options, course, record, false)?;
    }
    store.save_course(course)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use chrono::NaiveDateTime;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::data::timestamp;

    fn at(text: &str) -> Option<NaiveDateTime> {
        Some(NaiveDateTime::parse_from_str(text, timestamp::FORMAT).unwrap())
    }

    /// Verifies the classification table, including the one-hour grace.
    #[test]
    fn classification() {
        let due = at("2024-03-01 17:00:00");

        // Not passed at all.
        assert_eq!(classify(due, None, 120, false), PassMark::Incomplete);
        // Passed with no due date gate.
        assert_eq!(classify(None, at("2024-03-01 17:30:00"), 120, true), PassMark::Completed);
        // On time.
        assert_eq!(
            classify(due, at("2024-03-01 16:59:00"), 120, true),
            PassMark::Timely
        );
        // Thirty minutes over truncates to zero hours over.
        assert_eq!(
            classify(due, at("2024-03-01 17:30:00"), 120, true),
            PassMark::Timely
        );
        // Six hours over, inside the threshold.
        assert_eq!(
            classify(due, at("2024-03-01 23:30:00"), 120, true),
            PassMark::Tardy
        );
        // Far past the threshold.
        assert_eq!(
            classify(due, at("2024-03-07 18:00:00"), 120, true),
            PassMark::Late
        );
        // A zero threshold leaves only the grace hour between timely and late.
        assert_eq!(
            classify(due, at("2024-03-01 18:30:00"), 0, true),
            PassMark::Late
        );
    }
}
