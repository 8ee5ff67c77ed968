//! Core library modules for butterfly-compare
//!
//! Everything between a coordinate pair and a result row lives here. The
//! binary only parses flags, renders progress and prints rows.

pub mod adapter;
mod backends;
pub mod benchmark;
pub mod compare;
pub mod config;
pub mod coords;
pub mod error;
pub mod mode;
pub mod normalize;
pub mod plausibility;
pub mod resources;
pub mod retry;
pub mod rows;
pub mod session;
pub mod stats;
pub mod trip;
