//! Snapshot-by-snapshot close pair counting.
//!
//! The box size, overdensities and merger tree are read once. Each snapshot is
//! then searched independently and written to its own output file; a snapshot
//! whose catalog cannot be read is logged and skipped.

use galcore::catalog::SnapshotCatalog;
use galcore::environment::OverdensityTable;
use galcore::spatial::pairs::{unique_unordered, CandidatePair, PairFinder, PairSearchOpts};
use galcore::spatial::periodic::{GhostPolicy, PeriodicPointIndex};
use galcore::tree::forest::MergerTree;
use galcore::tree::lineage::{annotate, order_by_stellar_mass, LineageAnnotation};
use galcore::{GalcoreError, SnapNum};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn};

use crate::data::catalog::CatalogDataHandle;
use crate::data::environment::EnvironmentDataHandle;
use crate::data::tree::TreeDataHandle;
use crate::error::Result;
use crate::output::{PairRecord, PairWriter};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub snapnum_first: SnapNum,
    pub snapnum_last: SnapNum,
    pub search: PairSearchOpts,
    pub ghosts: GhostPolicy,
    /// Grid cell size of the spatial index, `rmax` when unset.
    pub cell_size: Option<f64>,
    /// Annotate pairs with merger-tree lineage.
    pub lineage: bool,
    /// Report each unordered pair once instead of once per subject.
    pub unique_pairs: bool,
    pub compress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            snapnum_first: 0,
            snapnum_last: 135,
            search: PairSearchOpts::default(),
            ghosts: GhostPolicy::default(),
            cell_size: None,
            lineage: true,
            unique_pairs: false,
            compress: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> galcore::Result<()> {
        if self.snapnum_first < 0 || self.snapnum_last < self.snapnum_first {
            return Err(GalcoreError::config(format!(
                "invalid snapshot range {}..={}",
                self.snapnum_first, self.snapnum_last
            )));
        }
        if let Some(c) = self.cell_size {
            if !(c.is_finite() && c > 0.0) {
                return Err(GalcoreError::config(format!("cell size must be positive, got {}", c)));
            }
        }
        self.search.validate()
    }

    fn effective_cell_size(&self) -> f64 {
        self.cell_size.unwrap_or(self.search.rmax)
    }
}

/// Overdensities for every non-empty snapshot in `[first, last]`, sentinel
/// filled where the environment store has no measurements.
pub fn read_overdensity_table(
    environment: &EnvironmentDataHandle,
    catalog: &CatalogDataHandle,
    first: SnapNum,
    last: SnapNum,
) -> Result<OverdensityTable> {
    let mut table = OverdensityTable::new();
    for snapnum in first..=last {
        let n_subhalos = catalog.count_subhalos(snapnum)?;
        if n_subhalos == 0 {
            continue;
        }
        match environment.read_overdensities(snapnum, n_subhalos)? {
            Some(values) => table.insert(snapnum, values),
            None => table.insert_missing(snapnum, n_subhalos),
        }
    }
    Ok(table)
}

/// Pairs of one snapshot with masses, overdensities and, when a tree is given,
/// lineage annotations.
pub fn process_snapshot(
    catalog: &SnapshotCatalog,
    box_size: f64,
    tree: Option<&MergerTree>,
    overdensities: &OverdensityTable,
    config: &PipelineConfig,
) -> Result<Vec<PairRecord>> {
    let snapnum = catalog.snapnum;
    let _span = info_span!("process_snapshot", snapnum).entered();
    catalog.validate()?;

    let index: PeriodicPointIndex =
        PeriodicPointIndex::build(box_size, &catalog.positions, config.ghosts, config.effective_cell_size())?;
    let stellar_mass = catalog.stellar_masses();
    let finder = PairFinder::new(&index, &config.search, snapnum)?;
    let mut pairs = finder.find_pairs(&stellar_mass)?;
    if config.unique_pairs {
        pairs = unique_unordered(&pairs);
    }

    let to_record = |pair: &CandidatePair| {
        let mut record = PairRecord::from_candidate(pair);
        record.subject_stellar_mass = stellar_mass[record.subject_id as usize];
        record.neighbor_stellar_mass = stellar_mass[record.neighbor_id as usize];
        record.subject_overdensity = overdensities.get(snapnum, record.subject_id);
        record.neighbor_overdensity = overdensities.get(snapnum, record.neighbor_id);
        if let Some(tree) = tree.filter(|_| config.lineage) {
            let (annotation, subject_is_primary) = lineage_of(tree, snapnum, &record);
            record.lineage = annotation;
            record.subject_is_primary = subject_is_primary;
        }
        record
    };

    let records: Vec<PairRecord> = if config.search.parallel {
        pairs.par_iter().map(to_record).collect()
    } else {
        pairs.iter().map(to_record).collect()
    };
    info!(n_pairs = records.len(), "found close pairs");
    Ok(records)
}

fn lineage_of(tree: &MergerTree, snapnum: SnapNum, record: &PairRecord) -> (LineageAnnotation, bool) {
    match (tree.subhalo(snapnum, record.subject_id), tree.subhalo(snapnum, record.neighbor_id)) {
        (Some(subject), Some(neighbor)) => {
            let (primary, secondary) = order_by_stellar_mass(subject, neighbor);
            (annotate(primary, secondary), primary == subject)
        }
        _ => (LineageAnnotation::unknown(), true),
    }
}

/// Run the pair search over `config.snapnum_first..=config.snapnum_last`.
///
/// Returns the number of snapshots written.
pub fn count_pairs_all(
    catalog: &CatalogDataHandle,
    tree: Option<&TreeDataHandle>,
    environment: Option<&EnvironmentDataHandle>,
    writer: &PairWriter,
    config: &PipelineConfig,
) -> Result<usize> {
    config.validate()?;
    let (first, last) = (config.snapnum_first, config.snapnum_last);

    let box_size = catalog.read_box_size()?;
    info!(box_size, "read box size");

    let overdensities = match environment {
        Some(env) => read_overdensity_table(env, catalog, first, last)?,
        None => {
            warn!("no environment store, overdensities are reported as the sentinel");
            OverdensityTable::new()
        }
    };

    let tree = match tree.filter(|_| config.lineage) {
        Some(handle) => Some(handle.load_tree()?),
        None => None,
    };

    let mut written = 0;
    for snapnum in first..=last {
        let snapshot = match catalog.read_snapshot(snapnum) {
            Ok(s) => s,
            Err(e) => {
                error!(snapnum, error = %e, "unable to read catalog, skipping snapshot");
                continue;
            }
        };
        let records = process_snapshot(&snapshot, box_size, tree.as_ref(), &overdensities, config)?;
        if let Err(e) = writer.write(snapnum, &records) {
            error!(snapnum, error = %e, "unable to write pairs, skipping snapshot");
            continue;
        }
        written += 1;
        info!(snapnum, "finished snapshot");
    }
    Ok(written)
}
