//! Defines the narrow storage interface the engine runs against, and its SQLite implementation.
//!
//! The engine does not assume a specific database: it needs typed lookups, saves, deletes, a few
//! list queries, and a monotonic sequence per entity kind for id allocation. Entities are stored
//! as JSON rows alongside the handful of columns the list queries filter on. The SQLite
//! implementation follows the usual setup: a pooled connection manager, migrations applied at
//! open, and the WAL/synchronous pragmas for read and write performance.

use anyhow::{Context, Result, anyhow};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};
use ustr::Ustr;

use crate::data::{Course, Exercise, PerformanceData, Playlist};

/// The interface between the engine and whatever holds its content.
pub trait ContentStore {
    /// Increments and returns the sequence for the given entity kind. The first call returns 1.
    fn next_sequence(&self, entity: &str) -> Result<i64>;

    /// Returns the exercise with the given id.
    fn get_exercise(&self, id: Ustr) -> Result<Option<Exercise>>;

    /// Inserts or replaces an exercise.
    fn save_exercise(&self, exercise: &Exercise) -> Result<()>;

    /// Deletes an exercise. Lifecycle guards live in the engine, not here.
    fn delete_exercise(&self, id: Ustr) -> Result<()>;

    /// Returns the playlist with the given id.
    fn get_playlist(&self, id: Ustr) -> Result<Option<Playlist>>;

    /// Inserts or replaces a playlist.
    fn save_playlist(&self, playlist: &Playlist) -> Result<()>;

    /// Deletes a playlist.
    fn delete_playlist(&self, id: Ustr) -> Result<()>;

    /// Returns the author's most recently updated auto-playlist.
    fn latest_auto_playlist(&self, author_id: Ustr) -> Result<Option<Playlist>>;

    /// Returns the latest `updated` value across all the author's playlists.
    fn latest_author_update(&self, author_id: Ustr) -> Result<Option<i64>>;

    /// Returns the course with the given id.
    fn get_course(&self, id: Ustr) -> Result<Option<Course>>;

    /// Inserts or replaces a course.
    fn save_course(&self, course: &Course) -> Result<()>;

    /// Deletes a course.
    fn delete_course(&self, id: Ustr) -> Result<()>;

    /// Returns the attempt record for one `(user, playlist, course)` triple.
    fn get_performance(
        &self,
        user_id: Ustr,
        playlist_id: Ustr,
        course_id: Option<Ustr>,
    ) -> Result<Option<PerformanceData>>;

    /// Inserts or replaces the attempt record for its triple.
    fn save_performance(&self, performance: &PerformanceData) -> Result<()>;

    /// Returns every attempt record graded by the course: records submitted inside it, plus
    /// course-less records against any of the given playlists. Ordered by `updated` ascending.
    fn performances_for_course(
        &self,
        course_id: Ustr,
        playlist_ids: &[Ustr],
    ) -> Result<Vec<PerformanceData>>;

    /// Returns whether anyone other than the given author has recorded attempts against the
    /// playlist.
    fn playlist_performed_by_other(&self, playlist_id: Ustr, author_id: Ustr) -> Result<bool>;

    /// Returns whether anyone other than the given author has recorded attempts inside the
    /// course.
    fn course_performed_by_other(&self, course_id: Ustr, author_id: Ustr) -> Result<bool>;
}

/// The stored course id for a record submitted outside any course. SQLite treats NULLs as
/// distinct in unique constraints, so the no-course case must be a real value for the triple's
/// primary key to hold.
const NO_COURSE: &str = "";

fn stored_course_id(course_id: Option<Ustr>) -> String {
    course_id.map_or_else(|| NO_COURSE.to_string(), |id| id.to_string())
}

/// An implementation of [`ContentStore`] backed by SQLite.
pub(crate) struct SqliteStore {
    /// A pool of connections to the database.
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Returns all the migrations needed to set up the database.
    fn migrations() -> Migrations<'static> {
        Migrations::new(vec![
            // Create the per-entity sequence table backing id allocation.
            M::up("CREATE TABLE sequences(entity TEXT PRIMARY KEY, value INTEGER NOT NULL);")
                .down("DROP TABLE sequences;"),
            // Create the entity tables. Each row carries the full JSON value plus the columns
            // the list queries filter on.
            M::up(
                "CREATE TABLE exercises(
                id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated INTEGER NOT NULL);",
            )
            .down("DROP TABLE exercises;"),
            M::up(
                "CREATE TABLE playlists(
                id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                is_auto INTEGER NOT NULL,
                data TEXT NOT NULL,
                updated INTEGER NOT NULL);",
            )
            .down("DROP TABLE playlists;"),
            M::up(
                "CREATE TABLE courses(
                id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated INTEGER NOT NULL);",
            )
            .down("DROP TABLE courses;"),
            M::up(
                "CREATE TABLE performances(
                user_id TEXT NOT NULL,
                playlist_id TEXT NOT NULL,
                course_id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated INTEGER NOT NULL,
                PRIMARY KEY (user_id, playlist_id, course_id));",
            )
            .down("DROP TABLE performances;"),
            // Index the lookups that drive grading replay and the collector.
            M::up("CREATE INDEX performances_by_course ON performances (course_id);")
                .down("DROP INDEX performances_by_course;"),
            M::up("CREATE INDEX performances_by_playlist ON performances (playlist_id);")
                .down("DROP INDEX performances_by_playlist;"),
            M::up("CREATE INDEX playlists_by_author ON playlists (author_id, updated);")
                .down("DROP INDEX playlists_by_author;"),
        ])
    }

    /// Initializes the database by running the migrations. If the migrations have been applied
    /// already, they will have no effect on the database.
    fn init(&mut self) -> Result<()> {
        let mut connection = self.pool.get()?;
        Self::migrations()
            .to_latest(&mut connection)
            .with_context(|| "failed to initialize content store")
    }

    /// A constructor taking a SQLite connection manager.
    pub fn new(connection_manager: SqliteConnectionManager) -> Result<SqliteStore> {
        let pool = Pool::new(connection_manager)?;
        let mut store = SqliteStore { pool };
        store.init()?;
        Ok(store)
    }

    /// A constructor taking the path to a database file.
    pub fn new_from_disk(db_path: &str) -> Result<SqliteStore> {
        let connection_manager = SqliteConnectionManager::file(db_path).with_init(
            |connection: &mut Connection| -> Result<(), rusqlite::Error> {
                // Pragmas tuned for concurrent reads during submission writes.
                connection.pragma_update(None, "journal_mode", "WAL")?;
                connection.pragma_update(None, "synchronous", "NORMAL")
            },
        );
        Self::new(connection_manager)
    }

    /// A constructor for an in-memory store.
    pub fn new_in_memory() -> Result<SqliteStore> {
        Self::new(SqliteConnectionManager::memory())
    }

    /// Helper to read one JSON row by id from the given table.
    fn get_row<T: serde::de::DeserializeOwned>(&self, table: &str, id: Ustr) -> Result<Option<T>> {
        let connection = self.pool.get()?;
        let mut stmt =
            connection.prepare_cached(&format!("SELECT data FROM {table} WHERE id = ?1;"))?;
        let row: Option<String> = stmt
            .query_row(params![id.as_str()], |row| row.get(0))
            .optional()?;
        match row {
            Some(data) => Ok(Some(serde_json::from_str(&data).with_context(|| {
                format!("cannot parse stored {table} row {id}")
            })?)),
            None => Ok(None),
        }
    }

    /// Helper to delete one row by id from the given table.
    fn delete_row(&self, table: &str, id: Ustr) -> Result<()> {
        let connection = self.pool.get()?;
        let mut stmt =
            connection.prepare_cached(&format!("DELETE FROM {table} WHERE id = ?1;"))?;
        stmt.execute(params![id.as_str()])?;
        Ok(())
    }
}

impl ContentStore for SqliteStore {
    fn next_sequence(&self, entity: &str) -> Result<i64> {
        let connection = self.pool.get()?;
        let mut stmt = connection.prepare_cached(
            "INSERT INTO sequences(entity, value) VALUES (?1, 1)
                ON CONFLICT(entity) DO UPDATE SET value = value + 1
                RETURNING value;",
        )?;
        let value = stmt.query_row(params![entity], |row| row.get(0))?;
        Ok(value)
    }

    fn get_exercise(&self, id: Ustr) -> Result<Option<Exercise>> {
        self.get_row("exercises", id)
    }

    fn save_exercise(&self, exercise: &Exercise) -> Result<()> {
        let connection = self.pool.get()?;
        let mut stmt = connection.prepare_cached(
            "INSERT OR REPLACE INTO exercises (id, author_id, data, updated)
                VALUES (?1, ?2, ?3, ?4);",
        )?;
        stmt.execute(params![
            exercise.id.as_str(),
            exercise.author_id.as_str(),
            serde_json::to_string(exercise)?,
            exercise.updated,
        ])?;
        Ok(())
    }

    fn delete_exercise(&self, id: Ustr) -> Result<()> {
        self.delete_row("exercises", id)
    }

    fn get_playlist(&self, id: Ustr) -> Result<Option<Playlist>> {
        self.get_row("playlists", id)
    }

    fn save_playlist(&self, playlist: &Playlist) -> Result<()> {
        let connection = self.pool.get()?;
        let mut stmt = connection.prepare_cached(
            "INSERT OR REPLACE INTO playlists (id, author_id, is_auto, data, updated)
                VALUES (?1, ?2, ?3, ?4, ?5);",
        )?;
        stmt.execute(params![
            playlist.id.as_str(),
            playlist.author_id.as_str(),
            playlist.is_auto,
            serde_json::to_string(playlist)?,
            playlist.updated,
        ])?;
        Ok(())
    }

    fn delete_playlist(&self, id: Ustr) -> Result<()> {
        self.delete_row("playlists", id)
    }

    fn latest_auto_playlist(&self, author_id: Ustr) -> Result<Option<Playlist>> {
        let connection = self.pool.get()?;
        let mut stmt = connection.prepare_cached(
            "SELECT data FROM playlists WHERE author_id = ?1 AND is_auto = 1
                ORDER BY updated DESC LIMIT 1;",
        )?;
        let row: Option<String> = stmt
            .query_row(params![author_id.as_str()], |row| row.get(0))
            .optional()?;
        match row {
            Some(data) => Ok(Some(serde_json::from_str(&data).with_context(|| {
                format!("cannot parse stored playlist for author {author_id}")
            })?)),
            None => Ok(None),
        }
    }

    fn latest_author_update(&self, author_id: Ustr) -> Result<Option<i64>> {
        let connection = self.pool.get()?;
        let mut stmt = connection
            .prepare_cached("SELECT MAX(updated) FROM playlists WHERE author_id = ?1;")?;
        let value: Option<i64> = stmt.query_row(params![author_id.as_str()], |row| row.get(0))?;
        Ok(value)
    }

    fn get_course(&self, id: Ustr) -> Result<Option<Course>> {
        self.get_row("courses", id)
    }

    fn save_course(&self, course: &Course) -> Result<()> {
        let connection = self.pool.get()?;
        let mut stmt = connection.prepare_cached(
            "INSERT OR REPLACE INTO courses (id, author_id, data, updated)
                VALUES (?1, ?2, ?3, ?4);",
        )?;
        stmt.execute(params![
            course.id.as_str(),
            course.author_id.as_str(),
            serde_json::to_string(course)?,
            course.updated,
        ])?;
        Ok(())
    }

    fn delete_course(&self, id: Ustr) -> Result<()> {
        self.delete_row("courses", id)
    }

    fn get_performance(
        &self,
        user_id: Ustr,
        playlist_id: Ustr,
        course_id: Option<Ustr>,
    ) -> Result<Option<PerformanceData>> {
        let connection = self.pool.get()?;
        let mut stmt = connection.prepare_cached(
            "SELECT data FROM performances
                WHERE user_id = ?1 AND playlist_id = ?2 AND course_id = ?3;",
        )?;
        let row: Option<String> = stmt
            .query_row(
                params![
                    user_id.as_str(),
                    playlist_id.as_str(),
                    stored_course_id(course_id)
                ],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            Some(data) => Ok(Some(serde_json::from_str(&data).with_context(|| {
                format!("cannot parse stored attempts for user {user_id}")
            })?)),
            None => Ok(None),
        }
    }

    fn save_performance(&self, performance: &PerformanceData) -> Result<()> {
        let connection = self.pool.get()?;
        let mut stmt = connection.prepare_cached(
            "INSERT OR REPLACE INTO performances (user_id, playlist_id, course_id, data, updated)
                VALUES (?1, ?2, ?3, ?4, ?5);",
        )?;
        stmt.execute(params![
            performance.user_id.as_str(),
            performance.playlist_id.as_str(),
            stored_course_id(performance.course_id),
            serde_json::to_string(performance)?,
            performance.updated,
        ])?;
        Ok(())
    }

    fn performances_for_course(
        &self,
        course_id: Ustr,
        playlist_ids: &[Ustr],
    ) -> Result<Vec<PerformanceData>> {
        let connection = self.pool.get()?;
        let mut records: Vec<PerformanceData> = Vec::new();

        let mut by_course =
            connection.prepare_cached("SELECT data FROM performances WHERE course_id = ?1;")?;
        let rows = by_course.query_map(params![course_id.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        for row in rows {
            records.push(serde_json::from_str(&row?).map_err(|e| anyhow!(e))?);
        }

        // Course-less records still count toward the course when their playlist is in it.
        let mut by_playlist = connection.prepare_cached(
            "SELECT data FROM performances WHERE course_id = ?1 AND playlist_id = ?2;",
        )?;
        for playlist_id in playlist_ids {
            let rows = by_playlist.query_map(params![NO_COURSE, playlist_id.as_str()], |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                records.push(serde_json::from_str(&row?).map_err(|e| anyhow!(e))?);
            }
        }

        records.sort_by_key(|record| record.updated);
        Ok(records)
    }

    fn playlist_performed_by_other(&self, playlist_id: Ustr, author_id: Ustr) -> Result<bool> {
        let connection = self.pool.get()?;
        let mut stmt = connection.prepare_cached(
            "SELECT EXISTS(
                SELECT 1 FROM performances WHERE playlist_id = ?1 AND user_id != ?2);",
        )?;
        let exists: bool =
            stmt.query_row(params![playlist_id.as_str(), author_id.as_str()], |row| {
                row.get(0)
            })?;
        Ok(exists)
    }

    fn course_performed_by_other(&self, course_id: Ustr, author_id: Ustr) -> Result<bool> {
        let connection = self.pool.get()?;
        let mut stmt = connection.prepare_cached(
            "SELECT EXISTS(
                SELECT 1 FROM performances WHERE course_id = ?1 AND user_id != ?2);",
        )?;
        let exists: bool =
            stmt.query_row(params![course_id.as_str(), author_id.as_str()], |row| {
                row.get(0)
            })?;
        Ok(exists)
    }
}
