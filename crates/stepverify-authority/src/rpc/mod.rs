//! JSON-RPC access to contracts deployed on an EVM node.

mod client;
pub mod contracts;
mod evm;

pub use client::RpcClient;
pub use evm::{protocol_from_abi, EvmAuthority, EvmConfig};
