//! Gatehouse-Common: Shared types and utilities.
//!
//! - **Typed IDs**: Type-safe UUID wrappers for users, resources and videos
//! - **Error Handling**: The error taxonomy shared by every crate, with HTTP
//!   status mapping
//! - **Storage Layout**: Path conventions for documents, raster caches and
//!   video packages, plus atomic write helpers

pub mod error;
pub mod ids;
pub mod storage;

pub use error::{Error, Result, UpgradeRequired};
pub use ids::{ResourceId, UserId, VideoId};
pub use storage::StorageLayout;
