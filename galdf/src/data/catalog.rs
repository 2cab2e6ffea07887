use std::path::Path;

use galcore::catalog::{subhalo_offsets, SnapshotCatalog};
use galcore::spatial::point::Point;
use galcore::tree::subhalo::N_PARTTYPES;
use galcore::{GalcoreError, SnapNum, SubfindId};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::data::utility::{json_column, json_column_opt, to_json};
use crate::error::{DataError, Result};

pub const CATALOG_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS header (
    key TEXT PRIMARY KEY,
    value REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS subhalos (
    snapnum INTEGER NOT NULL,
    subfind_id INTEGER NOT NULL,
    pos_x REAL NOT NULL,
    pos_y REAL NOT NULL,
    pos_z REAL NOT NULL,
    mass_type TEXT NOT NULL,
    len_type TEXT,
    PRIMARY KEY (snapnum, subfind_id)
);
CREATE TABLE IF NOT EXISTS groups (
    snapnum INTEGER NOT NULL,
    group_id INTEGER NOT NULL,
    nsubs INTEGER NOT NULL,
    len_type TEXT NOT NULL,
    PRIMARY KEY (snapnum, group_id)
);
";

/// Subhalo and FoF group catalogs of all snapshots.
#[derive(Debug)]
pub struct CatalogDataHandle {
    pub connection: Connection,
}

impl CatalogDataHandle {
    pub fn new(path: &Path) -> rusqlite::Result<Self> {
        let connection = Connection::open(path)?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn init_schema(&self) -> rusqlite::Result<()> {
        self.connection.execute_batch(CATALOG_SCHEMA)
    }

    /// Side length of the periodic box.
    pub fn read_box_size(&self) -> Result<f64> {
        self.connection
            .query_row("SELECT value FROM header WHERE key = 'BoxSize'", [], |row| row.get(0))
            .optional()?
            .ok_or_else(|| DataError::missing("no BoxSize in catalog header"))
    }

    pub fn write_box_size(&self, box_size: f64) -> rusqlite::Result<()> {
        self.connection.execute(
            "INSERT OR REPLACE INTO header (key, value) VALUES ('BoxSize', ?1)",
            params![box_size],
        )?;
        Ok(())
    }

    pub fn count_subhalos(&self, snapnum: SnapNum) -> rusqlite::Result<usize> {
        let n: i64 = self.connection.query_row(
            "SELECT COUNT(*) FROM subhalos WHERE snapnum = ?1",
            params![snapnum],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Positions and masses of one snapshot, ordered by subfind id.
    pub fn read_snapshot(&self, snapnum: SnapNum) -> Result<SnapshotCatalog> {
        let mut stmt = self.connection.prepare(
            "SELECT subfind_id, pos_x, pos_y, pos_z, mass_type FROM subhalos WHERE snapnum = ?1 ORDER BY subfind_id",
        )?;
        let rows = stmt.query_map(params![snapnum], |row| {
            let subfind_id: SubfindId = row.get(0)?;
            let position = Point::new(row.get(1)?, row.get(2)?, row.get(3)?);
            let mass_type: [f32; N_PARTTYPES] = json_column(row, 4)?;
            Ok((subfind_id, position, mass_type))
        })?;

        let mut positions = Vec::new();
        let mut mass_type = Vec::new();
        for row in rows {
            let (subfind_id, position, masses) = row?;
            if subfind_id as usize != positions.len() {
                return Err(GalcoreError::invalid_data(format!(
                    "snapshot {}: expected subfind id {}, found {}",
                    snapnum,
                    positions.len(),
                    subfind_id
                ))
                .into());
            }
            positions.push(position);
            mass_type.push(masses);
        }
        debug!(snapnum, n_subhalos = positions.len(), "read snapshot catalog");

        Ok(SnapshotCatalog::new(snapnum, positions, mass_type)?)
    }

    pub fn write_snapshot(&mut self, catalog: &SnapshotCatalog) -> Result<()> {
        catalog.validate()?;
        let tx = self.connection.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO subhalos (snapnum, subfind_id, pos_x, pos_y, pos_z, mass_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (i, (pos, masses)) in catalog.positions.iter().zip(&catalog.mass_type).enumerate() {
                stmt.execute(params![catalog.snapnum, i as SubfindId, pos.x, pos.y, pos.z, to_json(masses)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// First-particle offset of type `parttype` for every subhalo of `snapnum`.
    pub fn read_subhalo_offsets(&self, snapnum: SnapNum, parttype: usize) -> Result<Vec<u32>> {
        if parttype >= N_PARTTYPES {
            return Err(GalcoreError::config(format!("particle type {} out of range", parttype)).into());
        }

        let mut stmt = self
            .connection
            .prepare("SELECT nsubs, len_type FROM groups WHERE snapnum = ?1 ORDER BY group_id")?;
        let groups = stmt.query_map(params![snapnum], |row| {
            let nsubs: u32 = row.get(0)?;
            let len_type: [u32; N_PARTTYPES] = json_column(row, 1)?;
            Ok((nsubs, len_type[parttype]))
        })?;
        let mut group_nsubs = Vec::new();
        let mut group_len = Vec::new();
        for g in groups {
            let (nsubs, len) = g?;
            group_nsubs.push(nsubs);
            group_len.push(len);
        }

        let mut stmt = self
            .connection
            .prepare("SELECT subfind_id, len_type FROM subhalos WHERE snapnum = ?1 ORDER BY subfind_id")?;
        let subs = stmt.query_map(params![snapnum], |row| {
            let subfind_id: SubfindId = row.get(0)?;
            let len_type: Option<[u32; N_PARTTYPES]> = json_column_opt(row, 1)?;
            Ok((subfind_id, len_type))
        })?;
        let mut sub_len = Vec::new();
        for s in subs {
            match s? {
                (_, Some(len_type)) => sub_len.push(len_type[parttype]),
                (subfind_id, None) => {
                    return Err(DataError::missing(format!(
                        "snapshot {}: no particle counts for subhalo {}",
                        snapnum, subfind_id
                    )))
                }
            }
        }

        Ok(subhalo_offsets(&group_nsubs, &group_len, &sub_len)?)
    }
}
