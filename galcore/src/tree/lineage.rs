//! Walks along main branches of the merger tree.
//!
//! All functions take read-only handles and return `None` when a branch is
//! truncated before the walk reaches its goal. Two-branch walks expect the
//! secondary to be at the same snapshot as the primary or earlier, and panic
//! otherwise.

use serde::{Deserialize, Serialize};

use crate::tree::subhalo::Subhalo;
use crate::SnapNum;

/// The latest main-branch progenitor of `sub` with `snapnum() <= snapnum`.
///
/// Returns `sub` itself when `snapnum == sub.snapnum()`, and `None` when the
/// branch ends above `snapnum` or when `snapnum` is later than `sub`.
pub fn back_in_time(sub: Subhalo<'_>, snapnum: SnapNum) -> Option<Subhalo<'_>> {
    if snapnum > sub.snapnum() {
        return None;
    }
    let mut sub = sub;
    while sub.snapnum() > snapnum {
        sub = sub.first_progenitor()?;
    }
    Some(sub)
}

/// Step both branches back in lockstep until `stop` holds at a common snapshot.
///
/// The secondary moves one progenitor at a time; the primary follows it to the
/// secondary's snapshot. When the primary skipped that snapshot the secondary
/// moves on.
fn walk_synchronized<'a, F>(primary: Subhalo<'a>, secondary: Subhalo<'a>, stop: F) -> Option<(Subhalo<'a>, Subhalo<'a>)>
where
    F: Fn(&Subhalo<'a>, &Subhalo<'a>) -> bool,
{
    assert!(
        secondary.snapnum() <= primary.snapnum(),
        "secondary {} is later than primary {}",
        secondary,
        primary
    );
    let mut primary = primary;
    let mut secondary = Some(secondary);
    loop {
        let sec = secondary?;
        let snapnum = sec.snapnum();
        if primary.snapnum() > snapnum {
            primary = back_in_time(primary, snapnum)?;
        }
        if primary.snapnum() == snapnum && stop(&primary, &sec) {
            return Some((primary, sec));
        }
        secondary = sec.first_progenitor();
    }
}

/// Both belong to a known, common FoF group. A missing group link never matches.
#[inline]
fn same_group(p: &Subhalo<'_>, s: &Subhalo<'_>) -> bool {
    matches!(
        (p.first_subhalo_in_fof_group(), s.first_subhalo_in_fof_group()),
        (Some(a), Some(b)) if a == b
    )
}

/// Main-branch progenitors of both subhalos at the latest common snapshot not
/// later than `secondary`.
///
/// # Panics
///
/// If `secondary` is later than `primary`.
pub fn synchronize_subhalos<'a>(primary: Subhalo<'a>, secondary: Subhalo<'a>) -> Option<(Subhalo<'a>, Subhalo<'a>)> {
    walk_synchronized(primary, secondary, |_, _| true)
}

/// Main-branch progenitors at the latest common snapshot where the two are not
/// members of the same FoF group, i.e. just before infall.
///
/// # Panics
///
/// If `secondary` is later than `primary`.
pub fn infall_pair<'a>(primary: Subhalo<'a>, secondary: Subhalo<'a>) -> Option<(Subhalo<'a>, Subhalo<'a>)> {
    walk_synchronized(primary, secondary, |p, s| !same_group(p, s))
}

/// True if, once synchronized, both subhalos share a FoF group.
///
/// # Panics
///
/// If `secondary` is later than `primary`.
pub fn after_infall(primary: Subhalo<'_>, secondary: Subhalo<'_>) -> bool {
    match synchronize_subhalos(primary, secondary) {
        Some((p, s)) => same_group(&p, &s),
        None => false,
    }
}

/// True if `prog` lies on the main branch of `desc` (including `desc` itself).
#[inline]
pub fn along_main_branch(desc: Subhalo<'_>, prog: Subhalo<'_>) -> bool {
    let (d, p) = (desc.data(), prog.data());
    p.subhalo_id >= d.subhalo_id && p.subhalo_id <= d.main_leaf_progenitor_id
}

/// True if `prog` is anywhere in the progenitor subtree of `desc`.
/// A subhalo counts as its own descendant.
#[inline]
pub fn is_descendant(desc: Subhalo<'_>, prog: Subhalo<'_>) -> bool {
    let (d, p) = (desc.data(), prog.data());
    p.subhalo_id >= d.subhalo_id && p.subhalo_id <= d.last_progenitor_id
}

fn max_along_branch<'a, F>(sub: Subhalo<'a>, key: F) -> Option<Subhalo<'a>>
where
    F: Fn(&Subhalo<'a>) -> f32,
{
    let mut best: Option<(Subhalo<'a>, f32)> = None;
    for s in sub.first_progenitor()?.main_branch() {
        let v = key(&s);
        match best {
            Some((_, bv)) if !(v > bv) => {}
            _ => best = Some((s, v)),
        }
    }
    best.map(|(s, _)| s)
}

/// Progenitor of `sub` (excluding `sub`) with the largest total mass; ties go
/// to the latest one.
pub fn at_tmax(sub: Subhalo<'_>) -> Option<Subhalo<'_>> {
    max_along_branch(sub, |s| s.mass())
}

/// Progenitor of `sub` (excluding `sub`) with the largest stellar mass; ties go
/// to the latest one.
pub fn at_stmax(sub: Subhalo<'_>) -> Option<Subhalo<'_>> {
    max_along_branch(sub, |s| s.stellar_mass())
}

/// The secondary at its stellar-mass maximum and the primary's main-branch
/// progenitor at that time.
pub fn stmax_pair<'a>(primary: Subhalo<'a>, secondary: Subhalo<'a>) -> Option<(Subhalo<'a>, Subhalo<'a>)> {
    let sec = at_stmax(secondary)?;
    let prim = back_in_time(primary, sec.snapnum())?;
    Some((prim, sec))
}

/// Order two subhalos of one snapshot as `(primary, secondary)`: larger stellar
/// mass first, then larger total mass, then `a`.
pub fn order_by_stellar_mass<'a>(a: Subhalo<'a>, b: Subhalo<'a>) -> (Subhalo<'a>, Subhalo<'a>) {
    let key = |s: &Subhalo<'_>| (s.stellar_mass(), s.mass());
    let (ka, kb) = (key(&a), key(&b));
    if kb.0 > ka.0 || (kb.0 == ka.0 && kb.1 > ka.1) {
        (b, a)
    } else {
        (a, b)
    }
}

/// Merger history of a close pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageAnnotation {
    /// Both subhalos were found in the merger tree.
    pub known: bool,
    /// Snapshot just before the two started sharing a FoF group.
    pub infall_snapnum: Option<SnapNum>,
    pub after_infall: bool,
    /// Snapshot of the secondary's stellar-mass maximum.
    pub stmax_snapnum: Option<SnapNum>,
    /// Secondary over primary stellar mass at `stmax_snapnum`.
    pub stmax_mass_ratio: Option<f32>,
}

impl LineageAnnotation {
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Lineage of a pair, `secondary` no later than `primary`.
///
/// # Panics
///
/// If `secondary` is later than `primary`.
pub fn annotate(primary: Subhalo<'_>, secondary: Subhalo<'_>) -> LineageAnnotation {
    let stmax = stmax_pair(primary, secondary);
    LineageAnnotation {
        known: true,
        infall_snapnum: infall_pair(primary, secondary).map(|(p, _)| p.snapnum()),
        after_infall: after_infall(primary, secondary),
        stmax_snapnum: stmax.map(|(_, s)| s.snapnum()),
        stmax_mass_ratio: stmax.and_then(|(p, s)| {
            let mp = p.stellar_mass();
            (mp > 0.0).then(|| s.stellar_mass() / mp)
        }),
    }
}
