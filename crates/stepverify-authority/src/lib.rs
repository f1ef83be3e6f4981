//! Authority abstraction for the stepverify toolchain.
//!
//! This crate defines the `Authority` trait the replay engine drives, the
//! receipts and events it reads results from, an EVM JSON-RPC implementation
//! and an in-process implementation used for development and testing.

pub mod authority;
pub mod error;
pub mod memory;
pub mod receipt;
pub mod resolver;
pub mod rpc;
pub mod tree;

pub use authority::{
    Accounts, Authority, InstanceHandle, ProtocolDescriptor, ReplayArrays, SnapshotId, StepShape,
};
pub use error::{AuthorityError, Result};
pub use memory::{CallStats, MemoryAuthority, StepPolicy};
pub use receipt::{AuthorityEvent, EventKind, Receipt, ReceiptStatus, StepStatus};
pub use resolver::{AddressResolver, Deployment, DeploymentsDir, NetworkArtifacts, StaticResolver};
pub use rpc::{EvmAuthority, EvmConfig};
pub use tree::SparseMemory;
