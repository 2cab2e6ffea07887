use crate::error::{GalcoreError, Result};
use crate::spatial::point::Point;
use crate::tree::subhalo::{N_PARTTYPES, PARTTYPE_STARS};
use crate::SnapNum;

/// Subhalo properties of one snapshot, indexed by subfind id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotCatalog {
    pub snapnum: SnapNum,
    pub positions: Vec<Point>,
    pub mass_type: Vec<[f32; N_PARTTYPES]>,
}

impl SnapshotCatalog {
    pub fn new(snapnum: SnapNum, positions: Vec<Point>, mass_type: Vec<[f32; N_PARTTYPES]>) -> Result<Self> {
        let catalog = SnapshotCatalog { snapnum, positions, mass_type };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.positions.len() != self.mass_type.len() {
            return Err(GalcoreError::invalid_data(format!(
                "snapshot {}: {} positions but {} mass entries",
                self.snapnum,
                self.positions.len(),
                self.mass_type.len()
            )));
        }
        Ok(())
    }

    pub fn stellar_masses(&self) -> Vec<f32> {
        self.mass_type.iter().map(|m| m[PARTTYPE_STARS]).collect()
    }
}

/// Index of the first particle of one type for every subhalo in a snapshot.
///
/// Particles are stored group by group, and within a group subhalo by subhalo,
/// so a subhalo's offset is its group's offset plus the lengths of the earlier
/// subhalos of that group.
///
/// # Arguments
///
/// * `group_nsubs` - number of subhalos in each FoF group.
/// * `group_len` - particles of the type in each FoF group.
/// * `sub_len` - particles of the type in each subhalo.
pub fn subhalo_offsets(group_nsubs: &[u32], group_len: &[u32], sub_len: &[u32]) -> Result<Vec<u32>> {
    if group_nsubs.len() != group_len.len() {
        return Err(GalcoreError::invalid_data(format!(
            "{} group subhalo counts but {} group lengths",
            group_nsubs.len(),
            group_len.len()
        )));
    }
    let total: u64 = group_nsubs.iter().map(|&n| n as u64).sum();
    if total != sub_len.len() as u64 {
        return Err(GalcoreError::invalid_data(format!(
            "groups hold {} subhalos but {} subhalo lengths were given",
            total,
            sub_len.len()
        )));
    }

    let overflow = || GalcoreError::invalid_data("particle offset exceeds u32");
    let mut offsets = Vec::with_capacity(sub_len.len());
    let mut group_offset = 0u32;
    for (&nsubs, &glen) in group_nsubs.iter().zip(group_len) {
        let mut offset = group_offset;
        for _ in 0..nsubs {
            offsets.push(offset);
            offset = offset.checked_add(sub_len[offsets.len() - 1]).ok_or_else(overflow)?;
        }
        group_offset = group_offset.checked_add(glen).ok_or_else(overflow)?;
    }
    Ok(offsets)
}
