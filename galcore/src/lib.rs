// spatial module
pub mod spatial {
    pub mod point;
    pub mod index;
    pub mod periodic;
    pub mod pairs;
}

// merger tree module
pub mod tree {
    pub mod subhalo;
    pub mod forest;
    pub mod lineage;
}

pub mod catalog;
pub mod environment;
pub mod error;

pub use error::{GalcoreError, Result};

/// Integer time index of a simulation snapshot, larger is later.
pub type SnapNum = i16;
/// Depth-first merger-tree identifier of a subhalo.
pub type SubhaloId = i64;
/// Index of a subhalo inside its snapshot catalog.
pub type SubfindId = u32;
