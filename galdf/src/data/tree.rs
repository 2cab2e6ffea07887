use std::path::Path;

use galcore::tree::forest::MergerTree;
use galcore::tree::subhalo::SubhaloData;
use rusqlite::{params, Connection};
use tracing::info;

use crate::data::utility::{json_column, to_json};
use crate::error::Result;

pub const TREE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tree (
    subhalo_id INTEGER PRIMARY KEY,
    descendant_id INTEGER NOT NULL,
    first_progenitor_id INTEGER NOT NULL,
    next_progenitor_id INTEGER NOT NULL,
    first_subhalo_in_fof_group_id INTEGER NOT NULL,
    last_progenitor_id INTEGER NOT NULL,
    main_leaf_progenitor_id INTEGER NOT NULL,
    root_descendant_id INTEGER NOT NULL,
    snapnum INTEGER NOT NULL,
    subfind_id INTEGER NOT NULL,
    subhalo_mass REAL NOT NULL,
    subhalo_mass_type TEXT NOT NULL,
    group_pos TEXT NOT NULL,
    group_m_crit200 REAL NOT NULL,
    group_r_crit200 REAL NOT NULL
);
";

const TREE_COLUMNS: &str = "subhalo_id, descendant_id, first_progenitor_id, next_progenitor_id, \
    first_subhalo_in_fof_group_id, last_progenitor_id, main_leaf_progenitor_id, root_descendant_id, \
    snapnum, subfind_id, subhalo_mass, subhalo_mass_type, group_pos, group_m_crit200, group_r_crit200";

/// The concatenated merger tree, one row per subhalo.
#[derive(Debug)]
pub struct TreeDataHandle {
    pub connection: Connection,
}

impl TreeDataHandle {
    pub fn new(path: &Path) -> rusqlite::Result<Self> {
        let connection = Connection::open(path)?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn init_schema(&self) -> rusqlite::Result<()> {
        self.connection.execute_batch(TREE_SCHEMA)
    }

    pub fn read_records(&self) -> rusqlite::Result<Vec<SubhaloData>> {
        let mut stmt = self
            .connection
            .prepare(&format!("SELECT {} FROM tree ORDER BY subhalo_id", TREE_COLUMNS))?;
        let records_iter = stmt.query_map([], |row| {
            Ok(SubhaloData {
                subhalo_id: row.get(0)?,
                descendant_id: row.get(1)?,
                first_progenitor_id: row.get(2)?,
                next_progenitor_id: row.get(3)?,
                first_subhalo_in_fof_group_id: row.get(4)?,
                last_progenitor_id: row.get(5)?,
                main_leaf_progenitor_id: row.get(6)?,
                root_descendant_id: row.get(7)?,
                snapnum: row.get(8)?,
                subfind_id: row.get(9)?,
                subhalo_mass: row.get(10)?,
                subhalo_mass_type: json_column(row, 11)?,
                group_pos: json_column(row, 12)?,
                group_m_crit200: row.get(13)?,
                group_r_crit200: row.get(14)?,
            })
        })?;
        let mut records = Vec::new();
        for record in records_iter {
            records.push(record?);
        }
        Ok(records)
    }

    /// Read and validate the whole forest.
    pub fn load_tree(&self) -> Result<MergerTree> {
        let records = self.read_records()?;
        info!(n_records = records.len(), "read merger tree records");
        Ok(MergerTree::from_records(records)?)
    }

    pub fn write_records(&mut self, records: &[SubhaloData]) -> rusqlite::Result<()> {
        let tx = self.connection.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO tree ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                TREE_COLUMNS
            ))?;
            for r in records {
                stmt.execute(params![
                    r.subhalo_id,
                    r.descendant_id,
                    r.first_progenitor_id,
                    r.next_progenitor_id,
                    r.first_subhalo_in_fof_group_id,
                    r.last_progenitor_id,
                    r.main_leaf_progenitor_id,
                    r.root_descendant_id,
                    r.snapnum,
                    r.subfind_id,
                    r.subhalo_mass,
                    to_json(&r.subhalo_mass_type)?,
                    to_json(&r.group_pos)?,
                    r.group_m_crit200,
                    r.group_r_crit200,
                ])?;
            }
        }
        tx.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galcore::tree::forest::TreeBuilder;
    use galcore::GalcoreError;

    use crate::error::DataError;

    fn handle() -> TreeDataHandle {
        let handle = TreeDataHandle::from_connection(Connection::open_in_memory().unwrap());
        handle.init_schema().unwrap();
        handle
    }

    #[test]
    fn test_tree_roundtrip() {
        let mut b = TreeBuilder::new();
        let root = b.add(1, 0, 3.0, 0.5);
        let prog = b.add(0, 4, 2.0, 0.25);
        b.set_descendant(prog, root);
        b.data_mut(root).group_pos = [1.0, 2.0, 3.0];
        let tree = b.build(0).unwrap();

        let mut handle = handle();
        handle.write_records(tree.records()).unwrap();
        assert_eq!(handle.read_records().unwrap(), tree.records());

        let loaded = handle.load_tree().unwrap();
        let sub = loaded.subhalo(1, 0).unwrap();
        assert_eq!(sub.first_progenitor().map(|p| p.subfind_id()), Some(4));
        assert_eq!(sub.data().group_pos, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_invalid_tree_is_rejected() {
        let mut handle = handle();
        let record = SubhaloData {
            subhalo_id: 0,
            last_progenitor_id: 0,
            main_leaf_progenitor_id: 0,
            first_progenitor_id: 9,
            ..SubhaloData::default()
        };
        handle.write_records(&[record]).unwrap();
        assert!(matches!(handle.load_tree(), Err(DataError::Core(GalcoreError::Tree { .. }))));
    }
}
