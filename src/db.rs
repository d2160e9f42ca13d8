use crate::error::{Error, Result};
use crate::types::NormalizedPlate;
use log::debug;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Durable set of plates seen so far, keyed on the normalized plate.
pub trait PlateRegistry: Send + Sync {
    fn exists(&self, plate: &NormalizedPlate) -> Result<bool>;
    /// Fails with `Error::DuplicateKey` if the plate is already present.
    fn insert(&self, plate: &NormalizedPlate) -> Result<()>;
}

/// Append-only record of recognized plates.
pub trait EventLog: Send + Sync {
    fn record(&self, plate: &NormalizedPlate) -> Result<()>;
}

/// SQLite backed registry and access-event log. Uniqueness is enforced by
/// the primary key, so concurrent writers (other lanes, other processes)
/// cannot create a second row for a plate.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Database> {
        Database::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Database> {
        Database::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Database> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS plate (
                id TEXT NOT NULL PRIMARY KEY,
                first_seen REAL NOT NULL
            ) WITHOUT ROWID",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS access_event (
                plate TEXT NOT NULL,
                timestamp REAL NOT NULL
            )",
            [],
        )?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement cannot leave SQLite itself inconsistent.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seconds since the epoch at which the plate was first registered.
    pub fn first_seen(&self, plate: &NormalizedPlate) -> Result<Option<f64>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT first_seen FROM plate WHERE id = ?1",
                params![plate.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl PlateRegistry for Database {
    fn exists(&self, plate: &NormalizedPlate) -> Result<bool> {
        Ok(self.first_seen(plate)?.is_some())
    }

    fn insert(&self, plate: &NormalizedPlate) -> Result<()> {
        let inserted = self.conn().execute(
            "INSERT INTO plate(id, first_seen) VALUES (?1, ?2)",
            params![plate.as_str(), now()],
        );
        match inserted {
            Ok(_) => {
                debug!("Registered plate {}", plate);
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(Error::DuplicateKey {
                    plate: plate.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl EventLog for Database {
    fn record(&self, plate: &NormalizedPlate) -> Result<()> {
        self.conn().execute(
            "INSERT INTO access_event(plate, timestamp) VALUES (?1, ?2)",
            params![plate.as_str(), now()],
        )?;
        Ok(())
    }
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(db: &Database, table: &str, plate: &str) -> i64 {
        let column = if table == "plate" { "id" } else { "plate" };
        db.conn()
            .query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", table, column),
                params![plate],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn insert_then_exists_then_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let plate = NormalizedPlate::new("XYZ999");
        assert!(!db.exists(&plate).unwrap());
        db.insert(&plate).unwrap();
        assert!(db.exists(&plate).unwrap());
        match db.insert(&plate) {
            Err(Error::DuplicateKey { plate }) => assert_eq!(plate, "XYZ999"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rows(&db, "plate", "XYZ999"), 1);
    }

    #[test]
    fn lookup_is_exact_on_normalized_form() {
        let db = Database::open_in_memory().unwrap();
        db.insert(&NormalizedPlate::new("ab 123")).unwrap();
        assert!(db.exists(&NormalizedPlate::new("AB123")).unwrap());
        assert!(!db.exists(&NormalizedPlate::new("AB1234")).unwrap());
        assert!(db.first_seen(&NormalizedPlate::new("AB123")).unwrap().unwrap() > 0.0);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plates.db");
        Database::open(&path)
            .unwrap()
            .insert(&NormalizedPlate::new("KLM456"))
            .unwrap();
        let reopened = Database::open(&path).unwrap();
        assert!(reopened.exists(&NormalizedPlate::new("KLM456")).unwrap());
    }

    #[test]
    fn two_connections_share_the_unique_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plates.db");
        let lane_a = Database::open(&path).unwrap();
        let lane_b = Database::open(&path).unwrap();
        let plate = NormalizedPlate::new("RACE01");
        assert!(!lane_a.exists(&plate).unwrap());
        assert!(!lane_b.exists(&plate).unwrap());
        lane_a.insert(&plate).unwrap();
        assert!(matches!(lane_b.insert(&plate), Err(Error::DuplicateKey { .. })));
        assert_eq!(rows(&lane_b, "plate", "RACE01"), 1);
    }

    #[test]
    fn events_append() {
        let db = Database::open_in_memory().unwrap();
        let plate = NormalizedPlate::new("EVT777");
        db.record(&plate).unwrap();
        db.record(&plate).unwrap();
        assert_eq!(rows(&db, "access_event", "EVT777"), 2);
    }
}
