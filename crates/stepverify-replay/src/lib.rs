//! Trace replay and verification for the stepverify toolchain.
//!
//! This crate drives an [`Authority`](stepverify_authority::Authority)
//! through a [`RemoteSession`]:
//!
//! - `Verifier`: replays trace batches, one snapshot boundary per trace or per step
//! - `TraceReplayer`: opens instances for a trace, forwards proofs, invokes each step
//! - `ContinuousRunner`: bulk-loads programs and steps them until they halt
//!
//! ```ignore
//! use stepverify_replay::{NoopObserver, RemoteSession, Verifier, VerifyConfig};
//!
//! let session = RemoteSession::open(authority)?;
//! let verifier = Verifier::new(&session, VerifyConfig::default(), &NoopObserver)?;
//! let report = verifier.verify(&TraceLoader::new().load("traces/")?)?;
//! println!("{}", report.to_text());
//! ```

pub mod bulk;
pub mod error;
pub mod instance;
pub mod observer;
pub mod proof;
pub mod replayer;
pub mod report;
pub mod retry;
pub mod run;
pub mod session;
pub mod step;
pub mod verify;

pub use error::{ReplayError, Result};
pub use observer::{NoopObserver, ReplayObserver};
pub use replayer::{StepResult, TraceReplayer};
pub use report::{Report, RunReport, RunResult, UnitOutcome, UnitResult};
pub use retry::{Backoff, RetryPolicy};
pub use run::{ContinuousRunner, Program, RunConfig};
pub use session::RemoteSession;
pub use step::{negotiate, ShapeChoice, StepInvoker};
pub use verify::{Isolation, Verifier, VerifyConfig};
