//! cvsgitsync core library.
//!
//! This crate provides the components for bidirectional CVS/Git branch
//! synchronization: configuration, branch mapping, tree reconciliation,
//! repository clients, hooks, failure isolation, notifications, and the
//! sync engine.

pub mod branch_map;
pub mod config;
pub mod cvs;
pub mod errors;
pub mod git;
pub mod hooks;
pub mod isolation;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod sync_engine;
pub mod vcs;
pub mod workspace;

// Re-exports for convenience.
pub use branch_map::BranchMap;
pub use config::AppConfig;
pub use isolation::FailureIsolation;
pub use notify::Notifier;
pub use sync_engine::SyncEngine;
pub use vcs::NativeBackends;
