//! Per-snapshot overdensity lookup.

use tracing::warn;

use crate::{SnapNum, SubfindId};

/// Value reported for subhalos without an overdensity measurement.
pub const SENTINEL: f32 = -999.0;

/// Overdensity `delta` of every subhalo, indexed by snapshot and subfind id.
#[derive(Clone, Debug, Default)]
pub struct OverdensityTable {
    snapshots: Vec<Option<Vec<f32>>>,
}

impl OverdensityTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, snapnum: SnapNum) -> &mut Option<Vec<f32>> {
        assert!(snapnum >= 0, "negative snapnum {}", snapnum);
        let i = snapnum as usize;
        if self.snapshots.len() <= i {
            self.snapshots.resize(i + 1, None);
        }
        &mut self.snapshots[i]
    }

    /// Store the values for `snapnum`, replacing any previous ones.
    pub fn insert(&mut self, snapnum: SnapNum, values: Vec<f32>) {
        *self.slot(snapnum) = Some(values);
    }

    /// Mark `snapnum` as measured for nobody.
    pub fn insert_missing(&mut self, snapnum: SnapNum, n_subhalos: usize) {
        warn!(snapnum, n_subhalos, "no overdensities for snapshot, using sentinel");
        *self.slot(snapnum) = Some(vec![SENTINEL; n_subhalos]);
    }

    pub fn contains(&self, snapnum: SnapNum) -> bool {
        snapnum >= 0 && matches!(self.snapshots.get(snapnum as usize), Some(Some(_)))
    }

    /// Overdensity of one subhalo, [`SENTINEL`] when unknown.
    pub fn get(&self, snapnum: SnapNum, subfind_id: SubfindId) -> f32 {
        if snapnum < 0 {
            return SENTINEL;
        }
        self.snapshots
            .get(snapnum as usize)
            .and_then(|s| s.as_ref())
            .and_then(|v| v.get(subfind_id as usize))
            .copied()
            .unwrap_or(SENTINEL)
    }
}
