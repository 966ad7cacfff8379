//! Gatehouse - tiered access gating for paginated documents and video
//!
//! This library crate exposes the core functionality for integration testing.

pub mod access;
pub mod config;
pub mod documents;
pub mod protection;
pub mod server;
pub mod streaming;
pub mod video;
