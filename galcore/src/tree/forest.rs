//! The merger-tree forest: a flat arena of subhalo records.
//!
//! Links between records are resolved to arena indices once at load time; after
//! that the tree is read-only and can be shared across threads.

use std::collections::HashMap;

use tracing::info;

use crate::error::{GalcoreError, Result};
use crate::tree::subhalo::{Links, Subhalo, SubhaloData, N_PARTTYPES, NO_LINK, PARTTYPE_STARS};
use crate::{SnapNum, SubfindId, SubhaloId};

#[derive(Debug, Default)]
pub struct MergerTree {
    records: Vec<SubhaloData>,
    links: Vec<Links>,
    by_id: HashMap<SubhaloId, usize>,
    /// snapnum -> arena indices sorted by subfind id
    snapshots: Vec<Vec<usize>>,
}

impl MergerTree {
    /// Build the arena, resolving ids and checking the depth-first invariants.
    pub fn from_records(records: Vec<SubhaloData>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(records.len());
        for (i, r) in records.iter().enumerate() {
            if r.subhalo_id < 0 {
                return Err(GalcoreError::tree(r.subhalo_id, "negative subhalo id"));
            }
            if r.snapnum < 0 {
                return Err(GalcoreError::tree(r.subhalo_id, format!("negative snapnum {}", r.snapnum)));
            }
            if !(r.subhalo_id <= r.main_leaf_progenitor_id && r.main_leaf_progenitor_id <= r.last_progenitor_id) {
                return Err(GalcoreError::tree(
                    r.subhalo_id,
                    format!(
                        "expected id <= main leaf ({}) <= last progenitor ({})",
                        r.main_leaf_progenitor_id, r.last_progenitor_id
                    ),
                ));
            }
            if by_id.insert(r.subhalo_id, i).is_some() {
                return Err(GalcoreError::tree(r.subhalo_id, "duplicate subhalo id"));
            }
        }

        let resolve = |r: &SubhaloData, id: SubhaloId, field: &str| -> Result<Option<usize>> {
            if id == NO_LINK {
                return Ok(None);
            }
            by_id
                .get(&id)
                .map(|&i| Some(i))
                .ok_or_else(|| GalcoreError::tree(r.subhalo_id, format!("{} {} not in tree", field, id)))
        };

        let mut links = Vec::with_capacity(records.len());
        for r in &records {
            let l = Links {
                first_progenitor: resolve(r, r.first_progenitor_id, "first progenitor")?,
                next_progenitor: resolve(r, r.next_progenitor_id, "next progenitor")?,
                descendant: resolve(r, r.descendant_id, "descendant")?,
                first_in_group: resolve(r, r.first_subhalo_in_fof_group_id, "first subhalo in FoF group")?,
            };
            if let Some(p) = l.first_progenitor {
                if records[p].snapnum >= r.snapnum {
                    return Err(GalcoreError::tree(
                        r.subhalo_id,
                        format!(
                            "first progenitor at snapshot {} is not earlier than {}",
                            records[p].snapnum, r.snapnum
                        ),
                    ));
                }
            }
            links.push(l);
        }

        let n_snaps = records.iter().map(|r| r.snapnum as usize + 1).max().unwrap_or(0);
        let mut snapshots: Vec<Vec<usize>> = vec![Vec::new(); n_snaps];
        for (i, r) in records.iter().enumerate() {
            snapshots[r.snapnum as usize].push(i);
        }
        for snap in snapshots.iter_mut() {
            snap.sort_unstable_by_key(|&i| records[i].subfind_id);
            if let Some(w) = snap.windows(2).find(|w| records[w[0]].subfind_id == records[w[1]].subfind_id) {
                let r = &records[w[1]];
                return Err(GalcoreError::tree(
                    r.subhalo_id,
                    format!("subfind id {} appears twice at snapshot {}", r.subfind_id, r.snapnum),
                ));
            }
        }

        info!(
            n_subhalos = records.len(),
            n_snapshots = snapshots.iter().filter(|s| !s.is_empty()).count(),
            "loaded merger tree"
        );

        Ok(MergerTree { records, links, by_id, snapshots })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn record(&self, index: usize) -> &SubhaloData {
        &self.records[index]
    }

    pub(crate) fn links(&self, index: usize) -> &Links {
        &self.links[index]
    }

    pub fn records(&self) -> &[SubhaloData] {
        &self.records
    }

    pub fn by_id(&self, id: SubhaloId) -> Option<Subhalo<'_>> {
        self.by_id.get(&id).map(|&i| Subhalo::new(self, i))
    }

    /// The subhalo with catalog index `subfind_id` at `snapnum`.
    pub fn subhalo(&self, snapnum: SnapNum, subfind_id: SubfindId) -> Option<Subhalo<'_>> {
        let snap = self.snapshot_indices(snapnum);
        snap.binary_search_by_key(&subfind_id, |&i| self.records[i].subfind_id)
            .ok()
            .map(|k| Subhalo::new(self, snap[k]))
    }

    fn snapshot_indices(&self, snapnum: SnapNum) -> &[usize] {
        if snapnum < 0 {
            return &[];
        }
        self.snapshots.get(snapnum as usize).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// All subhalos at `snapnum`, by increasing subfind id.
    pub fn snapshot(&self, snapnum: SnapNum) -> impl Iterator<Item = Subhalo<'_>> {
        self.snapshot_indices(snapnum).iter().map(move |&i| Subhalo::new(self, i))
    }

    /// Snapshots that hold at least one subhalo, in increasing order.
    pub fn snapnums(&self) -> impl Iterator<Item = SnapNum> + '_ {
        self.snapshots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_empty())
            .map(|(snap, _)| snap as SnapNum)
    }

    pub fn iter(&self) -> impl Iterator<Item = Subhalo<'_>> {
        (0..self.records.len()).map(move |i| Subhalo::new(self, i))
    }
}

/// Assembles a [`MergerTree`] from descendant links, assigning depth-first ids.
///
/// Progenitors of a descendant are ordered by `subhalo_mass`, heaviest first, so
/// the heaviest progenitor becomes the main branch. Ties keep insertion order.
#[derive(Clone, Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<SubhaloData>,
    descendant: Vec<Option<usize>>,
    first_in_group: Vec<Option<usize>>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subhalo and return its builder key.
    pub fn add(&mut self, snapnum: SnapNum, subfind_id: SubfindId, mass: f32, stellar_mass: f32) -> usize {
        let mut mass_type = [0.0; N_PARTTYPES];
        mass_type[PARTTYPE_STARS] = stellar_mass;
        self.nodes.push(SubhaloData {
            snapnum,
            subfind_id,
            subhalo_mass: mass,
            subhalo_mass_type: mass_type,
            ..SubhaloData::default()
        });
        self.descendant.push(None);
        self.first_in_group.push(None);
        self.nodes.len() - 1
    }

    pub fn set_descendant(&mut self, progenitor: usize, descendant: usize) -> &mut Self {
        self.descendant[progenitor] = Some(descendant);
        self
    }

    /// Place `member` in the FoF group whose first subhalo is `first`.
    pub fn set_group(&mut self, member: usize, first: usize) -> &mut Self {
        self.first_in_group[member] = Some(first);
        self
    }

    /// Mutable access to the record, for group properties and other attributes.
    pub fn data_mut(&mut self, key: usize) -> &mut SubhaloData {
        &mut self.nodes[key]
    }

    /// Number the forest depth-first starting at `first_id` and build the tree.
    pub fn build(self, first_id: SubhaloId) -> Result<MergerTree> {
        let TreeBuilder { mut nodes, descendant, first_in_group } = self;
        let n = nodes.len();

        let mut progenitors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut roots = Vec::new();
        for (k, d) in descendant.iter().enumerate() {
            match d {
                Some(d) if *d >= n => {
                    return Err(GalcoreError::invalid_data(format!("descendant key {} out of range", d)));
                }
                Some(d) => progenitors[*d].push(k),
                None => roots.push(k),
            }
        }
        for progs in progenitors.iter_mut() {
            progs.sort_by(|&a, &b| nodes[b].subhalo_mass.total_cmp(&nodes[a].subhalo_mass));
        }

        // pre-order numbering, explicit stack to survive long branches
        let mut ids = vec![NO_LINK; n];
        let mut root_of = vec![0usize; n];
        let mut next_id = first_id;
        for &root in &roots {
            let mut stack = vec![root];
            while let Some(k) = stack.pop() {
                ids[k] = next_id;
                next_id += 1;
                root_of[k] = root;
                stack.extend(progenitors[k].iter().rev());
            }
        }
        if ids.iter().any(|&id| id == NO_LINK) {
            return Err(GalcoreError::invalid_data("descendant links contain a cycle"));
        }

        // subtree maxima and main leaves, children before parents
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_unstable_by_key(|&k| std::cmp::Reverse(ids[k]));
        let mut last = ids.clone();
        let mut main_leaf = ids.clone();
        for &k in &order {
            if let Some(&main) = progenitors[k].first() {
                main_leaf[k] = main_leaf[main];
            }
            for &p in &progenitors[k] {
                last[k] = last[k].max(last[p]);
            }
        }

        let id_of = |k: Option<usize>| k.map(|k| ids[k]).unwrap_or(NO_LINK);
        for k in 0..n {
            let next = descendant[k].and_then(|d| {
                let siblings = &progenitors[d];
                let pos = siblings.iter().position(|&s| s == k)?;
                siblings.get(pos + 1).copied()
            });
            let r = &mut nodes[k];
            r.subhalo_id = ids[k];
            r.descendant_id = id_of(descendant[k]);
            r.first_progenitor_id = id_of(progenitors[k].first().copied());
            r.next_progenitor_id = id_of(next);
            r.first_subhalo_in_fof_group_id = id_of(Some(first_in_group[k].unwrap_or(k)));
            r.last_progenitor_id = last[k];
            r.main_leaf_progenitor_id = main_leaf[k];
            r.root_descendant_id = ids[root_of[k]];
        }

        MergerTree::from_records(nodes)
    }
}
