use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tree::forest::MergerTree;
use crate::{SnapNum, SubfindId, SubhaloId};

/// Link value meaning "no such subhalo".
pub const NO_LINK: SubhaloId = -1;

/// Index of stars in `subhalo_mass_type`.
pub const PARTTYPE_STARS: usize = 4;

/// Number of particle types in `subhalo_mass_type`.
pub const N_PARTTYPES: usize = 6;

/// One merger-tree record.
///
/// Ids are assigned depth-first, so `[subhalo_id, last_progenitor_id]` spans the
/// whole progenitor subtree and `[subhalo_id, main_leaf_progenitor_id]` the main
/// branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubhaloData {
    pub subhalo_id: SubhaloId,
    pub descendant_id: SubhaloId,
    pub first_progenitor_id: SubhaloId,
    pub next_progenitor_id: SubhaloId,
    pub first_subhalo_in_fof_group_id: SubhaloId,
    pub last_progenitor_id: SubhaloId,
    pub main_leaf_progenitor_id: SubhaloId,
    pub root_descendant_id: SubhaloId,
    pub snapnum: SnapNum,
    pub subfind_id: SubfindId,
    pub subhalo_mass: f32,
    pub subhalo_mass_type: [f32; N_PARTTYPES],
    pub group_pos: [f32; 3],
    pub group_m_crit200: f32,
    pub group_r_crit200: f32,
}

impl Default for SubhaloData {
    fn default() -> Self {
        Self {
            subhalo_id: NO_LINK,
            descendant_id: NO_LINK,
            first_progenitor_id: NO_LINK,
            next_progenitor_id: NO_LINK,
            first_subhalo_in_fof_group_id: NO_LINK,
            last_progenitor_id: NO_LINK,
            main_leaf_progenitor_id: NO_LINK,
            root_descendant_id: NO_LINK,
            snapnum: 0,
            subfind_id: 0,
            subhalo_mass: 0.0,
            subhalo_mass_type: [0.0; N_PARTTYPES],
            group_pos: [0.0; 3],
            group_m_crit200: 0.0,
            group_r_crit200: 0.0,
        }
    }
}

impl SubhaloData {
    #[inline]
    pub fn stellar_mass(&self) -> f32 {
        self.subhalo_mass_type[PARTTYPE_STARS]
    }
}

/// Arena links resolved from the id fields at load time.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Links {
    pub first_progenitor: Option<usize>,
    pub next_progenitor: Option<usize>,
    pub descendant: Option<usize>,
    pub first_in_group: Option<usize>,
}

/// Read-only handle to a subhalo inside a [`MergerTree`].
///
/// A branch that does not exist is `None`, never a handle.
#[derive(Clone, Copy)]
pub struct Subhalo<'a> {
    tree: &'a MergerTree,
    index: usize,
}

impl<'a> Subhalo<'a> {
    pub(crate) fn new(tree: &'a MergerTree, index: usize) -> Self {
        Subhalo { tree, index }
    }

    #[inline]
    fn links(&self) -> &'a Links {
        self.tree.links(self.index)
    }

    #[inline]
    fn at(&self, index: Option<usize>) -> Option<Subhalo<'a>> {
        index.map(|i| Subhalo::new(self.tree, i))
    }

    /// Position in the tree arena.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn tree(&self) -> &'a MergerTree {
        self.tree
    }

    pub fn data(&self) -> &'a SubhaloData {
        self.tree.record(self.index)
    }

    #[inline]
    pub fn id(&self) -> SubhaloId {
        self.data().subhalo_id
    }

    #[inline]
    pub fn snapnum(&self) -> SnapNum {
        self.data().snapnum
    }

    #[inline]
    pub fn subfind_id(&self) -> SubfindId {
        self.data().subfind_id
    }

    pub fn mass(&self) -> f32 {
        self.data().subhalo_mass
    }

    pub fn stellar_mass(&self) -> f32 {
        self.data().stellar_mass()
    }

    /// Main-branch predecessor.
    pub fn first_progenitor(&self) -> Option<Subhalo<'a>> {
        self.at(self.links().first_progenitor)
    }

    /// Next progenitor of the same descendant.
    pub fn next_progenitor(&self) -> Option<Subhalo<'a>> {
        self.at(self.links().next_progenitor)
    }

    pub fn descendant(&self) -> Option<Subhalo<'a>> {
        self.at(self.links().descendant)
    }

    /// Central subhalo of the FoF group this subhalo belongs to.
    pub fn first_subhalo_in_fof_group(&self) -> Option<Subhalo<'a>> {
        self.at(self.links().first_in_group)
    }

    /// Last subhalo reached by following first progenitors, `self` if there is none.
    pub fn main_leaf_progenitor(&self) -> Subhalo<'a> {
        let mut sub = *self;
        while let Some(prog) = sub.first_progenitor() {
            sub = prog;
        }
        sub
    }

    /// `self` followed by its first progenitors, latest first.
    pub fn main_branch(&self) -> impl Iterator<Item = Subhalo<'a>> {
        std::iter::successors(Some(*self), |s| s.first_progenitor())
    }

    /// All direct progenitors, main progenitor first.
    pub fn progenitors(&self) -> impl Iterator<Item = Subhalo<'a>> {
        std::iter::successors(self.first_progenitor(), |s| s.next_progenitor())
    }
}

impl PartialEq for Subhalo<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.index == other.index
    }
}

impl Eq for Subhalo<'_> {}

impl fmt::Debug for Subhalo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subhalo")
            .field("id", &self.id())
            .field("snapnum", &self.snapnum())
            .field("subfind_id", &self.subfind_id())
            .finish()
    }
}

impl fmt::Display for Subhalo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subhalo({}, snap {}, subfind {})", self.id(), self.snapnum(), self.subfind_id())
    }
}
