use std::path::Path;

use galcore::environment::SENTINEL;
use galcore::{GalcoreError, SnapNum, SubfindId};
use rusqlite::{params, Connection};
use tracing::warn;

use crate::error::Result;

pub const ENVIRONMENT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS overdensity (
    snapnum INTEGER NOT NULL,
    subfind_id INTEGER NOT NULL,
    delta REAL NOT NULL,
    PRIMARY KEY (snapnum, subfind_id)
);
";

/// Environmental measurements per subhalo.
#[derive(Debug)]
pub struct EnvironmentDataHandle {
    pub connection: Connection,
}

impl EnvironmentDataHandle {
    pub fn new(path: &Path) -> rusqlite::Result<Self> {
        let connection = Connection::open(path)?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn init_schema(&self) -> rusqlite::Result<()> {
        self.connection.execute_batch(ENVIRONMENT_SCHEMA)
    }

    /// Overdensities of all `n_subhalos` subhalos at `snapnum`, `None` if the
    /// snapshot was never measured. Subhalos without a row get the sentinel.
    pub fn read_overdensities(&self, snapnum: SnapNum, n_subhalos: usize) -> Result<Option<Vec<f32>>> {
        let mut stmt = self
            .connection
            .prepare("SELECT subfind_id, delta FROM overdensity WHERE snapnum = ?1 ORDER BY subfind_id")?;
        let rows = stmt.query_map(params![snapnum], |row| {
            let subfind_id: SubfindId = row.get(0)?;
            let delta: f32 = row.get(1)?;
            Ok((subfind_id, delta))
        })?;

        let mut values = vec![SENTINEL; n_subhalos];
        let mut n_rows = 0;
        for row in rows {
            let (subfind_id, delta) = row?;
            let slot = values.get_mut(subfind_id as usize).ok_or_else(|| {
                GalcoreError::invalid_data(format!(
                    "snapshot {}: overdensity for subhalo {} but only {} subhalos",
                    snapnum, subfind_id, n_subhalos
                ))
            })?;
            *slot = delta;
            n_rows += 1;
        }

        if n_rows == 0 {
            return Ok(None);
        }
        if n_rows < n_subhalos {
            warn!(snapnum, n_missing = n_subhalos - n_rows, "overdensities missing for some subhalos, using sentinel");
        }
        Ok(Some(values))
    }

    pub fn write_overdensities(&mut self, snapnum: SnapNum, values: &[f32]) -> rusqlite::Result<()> {
        let tx = self.connection.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO overdensity (snapnum, subfind_id, delta) VALUES (?1, ?2, ?3)")?;
            for (i, delta) in values.iter().enumerate() {
                stmt.execute(params![snapnum, i as SubfindId, delta])?;
            }
        }
        tx.commit()
    }
}
