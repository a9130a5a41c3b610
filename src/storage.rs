use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;

use crate::profile::CalibrationProfile;
use crate::session::SessionId;

/// Persistence for calibration profiles, keyed by session.
///
/// Stores are not responsible for serializing access to one session; the
/// service holds the per-session lock while it talks to the store.
pub trait ProfileStore: Send {
    fn load(&mut self, session: &SessionId) -> Result<Option<CalibrationProfile>>;

    /// Insert or replace the profile of `session`.
    fn save(&mut self, session: &SessionId, profile: &CalibrationProfile) -> Result<()>;

    /// Returns true when a profile existed.
    fn remove(&mut self, session: &SessionId) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: HashMap<SessionId, CalibrationProfile>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn load(&mut self, session: &SessionId) -> Result<Option<CalibrationProfile>> {
        Ok(self.profiles.get(session).cloned())
    }

    fn save(&mut self, session: &SessionId, profile: &CalibrationProfile) -> Result<()> {
        self.profiles.insert(session.clone(), profile.clone());
        Ok(())
    }

    fn remove(&mut self, session: &SessionId) -> Result<bool> {
        Ok(self.profiles.remove(session).is_some())
    }
}

pub struct SqliteProfileStore {
    conn: Connection,
}

impl SqliteProfileStore {
    /// Open (or create) a profile database. `file:` URIs are honoured so
    /// tests can use shared in-memory databases.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = if db_path.starts_with("file:") {
            Connection::open_with_flags(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )?
        } else {
            Connection::open(db_path)?
        };
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS calibration_profiles (
              session_id TEXT PRIMARY KEY,
              known_object_width_cm REAL NOT NULL,
              known_distance_cm REAL NOT NULL,
              focal_length_px REAL NOT NULL,
              apparent_width_px REAL NOT NULL,
              calibrated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM calibration_profiles", [], |row| {
                    row.get(0)
                })?;
        Ok(n as u64)
    }
}

impl ProfileStore for SqliteProfileStore {
    fn load(&mut self, session: &SessionId) -> Result<Option<CalibrationProfile>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT known_object_width_cm, known_distance_cm, focal_length_px,
                       apparent_width_px, calibrated_at
                FROM calibration_profiles WHERE session_id = ?1
                "#,
                params![session.as_str()],
                |row| {
                    Ok((
                        row.get::<_, f64>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((width, distance, focal, apparent, calibrated_at)) = row else {
            return Ok(None);
        };
        if !(focal.is_finite() && focal > 0.0) {
            return Err(anyhow!(
                "corrupt profile for session '{}': focal length {}",
                session,
                focal
            ));
        }
        Ok(Some(CalibrationProfile {
            known_object_width_cm: width,
            known_distance_cm: distance,
            focal_length_px: focal,
            apparent_width_px: apparent,
            calibrated_at_epoch_s: u64::try_from(calibrated_at).unwrap_or(0),
        }))
    }

    fn save(&mut self, session: &SessionId, profile: &CalibrationProfile) -> Result<()> {
        let calibrated_at = i64::try_from(profile.calibrated_at_epoch_s)
            .map_err(|_| anyhow!("calibration timestamp exceeds i64 range"))?;
        self.conn.execute(
            r#"
            INSERT INTO calibration_profiles(
              session_id, known_object_width_cm, known_distance_cm,
              focal_length_px, apparent_width_px, calibrated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(session_id) DO UPDATE SET
              known_object_width_cm = excluded.known_object_width_cm,
              known_distance_cm = excluded.known_distance_cm,
              focal_length_px = excluded.focal_length_px,
              apparent_width_px = excluded.apparent_width_px,
              calibrated_at = excluded.calibrated_at
            "#,
            params![
                session.as_str(),
                profile.known_object_width_cm,
                profile.known_distance_cm,
                profile.focal_length_px,
                profile.apparent_width_px,
                calibrated_at
            ],
        )?;
        Ok(())
    }

    fn remove(&mut self, session: &SessionId) -> Result<bool> {
        let n = self.conn.execute(
            "DELETE FROM calibration_profiles WHERE session_id = ?1",
            params![session.as_str()],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(focal: f64) -> CalibrationProfile {
        CalibrationProfile {
            known_object_width_cm: 8.5,
            known_distance_cm: 30.0,
            focal_length_px: focal,
            apparent_width_px: focal * 8.5 / 30.0,
            calibrated_at_epoch_s: 1_700_000_000,
        }
    }

    fn exercise(store: &mut dyn ProfileStore) -> Result<()> {
        let a = SessionId::parse("alpha")?;
        let b = SessionId::parse("beta")?;
        assert_eq!(store.load(&a)?, None);

        store.save(&a, &profile(700.0))?;
        store.save(&b, &profile(650.0))?;
        assert_eq!(store.load(&a)?, Some(profile(700.0)));

        store.save(&a, &profile(720.0))?;
        assert_eq!(store.load(&a)?, Some(profile(720.0)));
        assert_eq!(store.load(&b)?, Some(profile(650.0)));

        assert!(store.remove(&a)?);
        assert!(!store.remove(&a)?);
        assert_eq!(store.load(&a)?, None);
        Ok(())
    }

    #[test]
    fn in_memory_store_semantics() -> Result<()> {
        exercise(&mut InMemoryProfileStore::new())
    }

    #[test]
    fn sqlite_store_semantics() -> Result<()> {
        exercise(&mut SqliteProfileStore::open(":memory:")?)
    }

    #[test]
    fn sqlite_store_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("profiles.db");
        let path = path.to_string_lossy().to_string();
        let session = SessionId::parse("kitchen-cam")?;
        {
            let mut store = SqliteProfileStore::open(&path)?;
            store.save(&session, &profile(812.5))?;
        }
        let mut store = SqliteProfileStore::open(&path)?;
        assert_eq!(store.count()?, 1);
        assert_eq!(store.load(&session)?, Some(profile(812.5)));
        Ok(())
    }
}
