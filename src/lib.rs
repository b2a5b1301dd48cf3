#![deny(
    unsafe_code,
    // clippy::unwrap_used,
    // clippy::expect_used,
    clippy::panic,
)]

//! Task-oriented build orchestrator with content-addressed output caching.
//!
//! Users declare named tasks in `*.tasks` files scattered across a project
//! tree. Each task belongs to a group (defaulting to its file's stem), lists
//! its input and output files as glob patterns, and may depend on other
//! tasks by `name` or `group:name`. Running a task runs its transitive
//! dependency closure in topological order, and tasks that opt into caching
//! have their outputs archived under a hash of all their inputs, so a rerun
//! with identical inputs restores the outputs instead of executing again.
//!
//! The crate is the engine only. Evaluating a task file as executable source
//! is delegated to a [`TaskFileEvaluator`], and the command-line front-end
//! is expected to drive [`Project`] for discovery, help text, and execution.

pub mod cache;
pub mod error;
mod executor;
pub mod graph;
pub mod loader;
pub mod project;
pub mod settings;
pub mod task;
mod utils;

pub use camino;

use std::fmt::Debug;

pub use crate::cache::{DirectoryTaskCache, MemoryTaskCache, TaskCache};
pub use crate::executor::Context;
pub use crate::graph::{TaskGraph, TopologicalOrder};
pub use crate::loader::{TaskFile, TaskFileEvaluator, TaskScope, load_all};
pub use crate::project::{CommandSpec, Project};
pub use crate::settings::{Settings, find_project_root};
pub use crate::task::{ScalarValue, Task, TaskBuilder};
pub use crate::utils::{WorkingDir, xglob};

/// File name that marks the project root and holds the [`Settings`] document.
pub const ROOT_SETTINGS_FILE_NAME: &str = "xtask.project";

/// Extension of task-definition files discovered beneath the project root.
pub const TASKS_FILE_EXTENSION: &str = "tasks";

/// 128-bit digest over a task's inputs, used as the cache key.
///
/// The digest covers the defining file's bytes, the bytes of every resolved
/// input file in sorted path order, and each additional scalar input in
/// declaration order. File paths never enter the digest, so renaming
/// equal-content inputs leaves the hash unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InputHash(u128);

impl InputHash {
    pub(crate) fn from_digest(digest: blake3::Hash) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        InputHash(u128::from_le_bytes(bytes))
    }

    /// The raw 128-bit value, little-endian interpretation of the digest.
    pub fn value(self) -> u128 {
        self.0
    }
}

impl From<u128> for InputHash {
    fn from(value: u128) -> Self {
        InputHash(value)
    }
}

impl std::fmt::Display for InputHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for InputHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InputHash({})", self.0)
    }
}

/// Installs a `tracing` subscriber filtered to `level`, for hosts that want
/// the engine's default logging surface instead of wiring their own.
#[cfg(feature = "logging")]
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
