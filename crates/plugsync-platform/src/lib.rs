//! Per-platform application directories for plugsync.

mod paths;

pub use paths::{AppPaths, AppPathsError};
