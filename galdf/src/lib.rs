// src/lib.rs
pub mod data {
    pub mod utility;
    pub mod catalog;
    pub mod tree;
    pub mod environment;
}

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
