//! CRI Common Library
//!
//! This crate provides the value types, protocol constants and configuration
//! loading shared by every crate of the CRI robot link workspace.
//!
//! # Module Structure
//!
//! - [`position`] - `PositionSet`, the pose record exchanged by every component
//! - [`consts`] - Protocol markers, default ports, limits and intervals
//! - [`config`] - Configuration loading traits and the `LinkConfig` tree
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use cri_common::prelude::*;
//!
//! let mut pose = PositionSet::default();
//! pose.joints[0] = 12.5;
//! assert!(!pose.is_cartesian);
//! ```

pub mod config;
pub mod consts;
pub mod position;
pub mod prelude;
