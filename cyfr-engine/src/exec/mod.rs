//! # Exec Module
//!
//! The orchestration layer: binary resolution, pre-flight policy
//! evaluation, the execution pipeline, and forensic replay.
//!
//! Imports from every other layer.

pub mod executor;
pub mod fetcher;
pub mod opts;
pub mod replay;

pub use executor::{Executor, ExecutorBuilder, RunOptions};
pub use fetcher::{BinaryFetcher, FetchedBinary, RegistryClient, RegistryInspect};
pub use opts::{ExecutionOpts, PolicyEnforcer};
pub use replay::{CompareReport, ReplayReport, ReplayVerification, VerifyReport};
