//! Error types shared by the galcore modules.
//!
//! Tree walks never fail with an error: a truncated branch is an `Option::None`.
//! The variants here cover configuration, load-time validation and I/O.

use thiserror::Error;

use crate::SubhaloId;

#[derive(Error, Debug)]
pub enum GalcoreError {
    /// I/O errors surfaced by readers built on top of galcore
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid search or index parameters (negative radii, zero box size)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Inconsistent catalog arrays (length mismatch, bad offsets)
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Merger tree records that violate the depth-first id invariants
    #[error("Merger tree error at subhalo {subhalo_id}: {message}")]
    Tree { subhalo_id: SubhaloId, message: String },
}

pub type Result<T> = std::result::Result<T, GalcoreError>;

impl GalcoreError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn tree(subhalo_id: SubhaloId, message: impl Into<String>) -> Self {
        Self::Tree {
            subhalo_id,
            message: message.into(),
        }
    }
}
