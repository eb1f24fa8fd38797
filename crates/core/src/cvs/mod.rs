//! CVS CLI wrapper for cvsgitsync.

pub mod client;

pub use client::CvsClient;
