//! Core types for the stepverify toolchain.
//!
//! This crate defines the trace model replayed against a remote authority,
//! the loaders for trace files and run manifests, and the outcome and error
//! types shared by the other crates. It does not talk to any authority.

pub mod error;
pub mod format;
pub mod loader;
pub mod manifest;
pub mod outcome;
pub mod trace;

pub use error::{Error, Result};
pub use loader::{LoadedFile, TraceLoader};
pub use outcome::{AccessOutcome, Outcome};
pub use trace::{AccessKind, Hash, MemoryAccess, Proof, SiblingPath, Step, Trace, Word};
