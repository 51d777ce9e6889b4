//! Collects an author's freshly created exercises into an auto-playlist.
//!
//! Each author has at most one open auto-playlist at a time. A new exercise lands in the most
//! recent auto-playlist if it is still inside the collection window and no other playlist of the
//! author's has been touched since; otherwise the bucket is considered closed and a fresh
//! auto-playlist starts with this exercise.

use anyhow::Result;
use chrono::{DateTime, Utc};
use ustr::Ustr;

use crate::{
    data::{EngineOptions, Playlist},
    identifier,
    store::ContentStore,
};

/// The time suffix appended to an auto-playlist's default name.
const NAME_TIME_FORMAT: &str = "%Y%m%d_%H%M";

/// Routes a newly created exercise into the author's auto-playlist, opening a new one when the
/// current bucket has expired or been superseded by a manual edit.
pub(crate) fn collect_exercise(
    store: &dyn ContentStore,
    options: &EngineOptions,
    author_id: Ustr,
    exercise_id: Ustr,
    now: DateTime<Utc>,
) -> Result<()> {
    let window_start = (now - options.auto_playlist_window).timestamp();
    let latest_auto = store
        .latest_auto_playlist(author_id)?
        .filter(|playlist| playlist.updated >= window_start);

    let mut playlist = match latest_auto {
        Some(playlist) => {
            // A fresher edit to any of the author's playlists closes the bucket.
            let latest_update = store.latest_author_update(author_id)?.unwrap_or(0);
            if latest_update > playlist.updated {
                new_auto_playlist(store, options, author_id, now)?
            } else {
                playlist
            }
        }
        None => new_auto_playlist(store, options, author_id, now)?,
    };

    playlist.push_exercise(exercise_id);
    playlist.updated = now.timestamp();
    store.save_playlist(&playlist)
}

/// Opens a new empty auto-playlist named after its id and the site-local creation time.
fn new_auto_playlist(
    store: &dyn ContentStore,
    options: &EngineOptions,
    author_id: Ustr,
    now: DateTime<Utc>,
) -> Result<Playlist> {
    let id = identifier::id_from_integer('P', store.next_sequence("playlist")?)?;
    let local_now = now.with_timezone(&options.site_offset);
    let name = format!("U{}_{}", &id[1..], local_now.format(NAME_TIME_FORMAT));
    Ok(Playlist {
        id: Ustr::from(id.as_str()),
        author_id,
        name,
        entries: vec![],
        transpose_requests: vec![],
        transposition_type: Default::default(),
        is_public: false,
        is_auto: true,
        updated: now.timestamp(),
    })
}

#[cfg(test)]
mod test {
    use anyhow::Result;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use ustr::Ustr;

    use super::*;
    use crate::{data::PlaylistBuilder, store::SqliteStore};

    fn setup() -> Result<(SqliteStore, EngineOptions, Ustr)> {
        Ok((
            SqliteStore::new_in_memory()?,
            EngineOptions::default(),
            Ustr::from("instructor"),
        ))
    }

    /// Verifies the first exercise opens an auto-playlist with the derived default name.
    #[test]
    fn opens_bucket() -> Result<()> {
        let (store, options, author) = setup()?;
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 17, 5, 0).unwrap();
        collect_exercise(&store, &options, author, Ustr::from("EA00A0"), now)?;

        let playlist = store.latest_auto_playlist(author)?.unwrap();
        assert_eq!(playlist.id.as_str(), "PA00A0");
        assert_eq!(playlist.name, "UA00A0_20240301_1705");
        assert!(playlist.is_auto);
        assert_eq!(playlist.entries.len(), 1);
        Ok(())
    }

    /// Verifies consecutive exercises append to the open bucket in order.
    #[test]
    fn appends_to_open_bucket() -> Result<()> {
        let (store, options, author) = setup()?;
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        collect_exercise(&store, &options, author, Ustr::from("EA00A0"), start)?;
        collect_exercise(
            &store,
            &options,
            author,
            Ustr::from("EA00A1"),
            start + Duration::hours(2),
        )?;

        let playlist = store.latest_auto_playlist(author)?.unwrap();
        assert_eq!(playlist.entries.len(), 2);
        assert_eq!(playlist.entries[1].exercise_id.as_str(), "EA00A1");
        assert_eq!(playlist.entries[1].order, 2);
        Ok(())
    }

    /// Verifies an expired bucket is left alone and a new one opens.
    #[test]
    fn window_expiry_opens_new_bucket() -> Result<()> {
        let (store, options, author) = setup()?;
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        collect_exercise(&store, &options, author, Ustr::from("EA00A0"), start)?;
        collect_exercise(
            &store,
            &options,
            author,
            Ustr::from("EA00A1"),
            start + Duration::hours(9),
        )?;

        let playlist = store.latest_auto_playlist(author)?.unwrap();
        assert_eq!(playlist.id.as_str(), "PA00A1");
        assert_eq!(playlist.entries.len(), 1);
        Ok(())
    }

    /// Verifies a fresher manual edit closes the bucket even inside the window.
    #[test]
    fn manual_edit_closes_bucket() -> Result<()> {
        let (store, options, author) = setup()?;
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        collect_exercise(&store, &options, author, Ustr::from("EA00A0"), start)?;

        let manual = PlaylistBuilder::default()
            .id("PA00A9")
            .author_id("instructor")
            .name("Week 1")
            .updated((start + Duration::hours(1)).timestamp())
            .build()
            .unwrap();
        store.save_playlist(&manual)?;

        collect_exercise(
            &store,
            &options,
            author,
            Ustr::from("EA00A1"),
            start + Duration::hours(2),
        )?;
        let playlist = store.latest_auto_playlist(author)?.unwrap();
        assert_ne!(playlist.id.as_str(), "PA00A0");
        assert_eq!(playlist.entries.len(), 1);
        Ok(())
    }
}
