//! Song similarity playlist library - shared modules for both binaries.

pub mod error;
pub mod genre;
pub mod models;
pub mod normalize;
pub mod prepare;
pub mod progress;
pub mod recommend;
pub mod safety;
pub mod scoring;
pub mod table;
