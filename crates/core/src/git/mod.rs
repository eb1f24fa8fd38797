//! Git side of the synchronization: a `git2`-backed working area.

pub mod client;

pub use client::{GitClient, GitIdentity};
