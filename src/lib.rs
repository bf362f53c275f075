//! Kiln - layer-cached valkey image builds
//!
//! Drives buildah step by step, caching each expensive step as a tagged
//! image keyed on its inputs and the image it ran on.

pub mod cache;
pub mod cli;
pub mod config;
pub mod distro;
pub mod error;
pub mod orchestration;
pub mod recipes;
pub mod ui;

pub use error::{KilnError, KilnResult};
