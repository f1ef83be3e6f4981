//! Authority backed by memory manager and step contracts on an EVM node.

use std::thread;
use std::time::{Duration, Instant};

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use alloy_sol_types::{SolCall, SolEvent};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use stepverify_core::{Hash, Word};

use super::client::RpcClient;
use super::contracts::{IMemoryManager, IStep, IStepArrays};
use crate::authority::{
    Accounts, Authority, InstanceHandle, ProtocolDescriptor, ReplayArrays, SnapshotId, StepShape,
};
use crate::error::{AuthorityError, Result};
use crate::receipt::{AuthorityEvent, Receipt};
use crate::resolver::{AddressResolver, Deployment};

/// Connection settings for an EVM authority.
#[derive(Debug, Clone)]
pub struct EvmConfig {
    pub url: Url,
    /// Bound on every request and on waiting for a receipt.
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub gas: u64,
    pub memory_contract: String,
    pub step_contract: String,
}

impl EvmConfig {
    /// Settings for `url` with the defaults of a local development node.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            gas: 6_283_185,
            memory_contract: "MMInstantiator".to_string(),
            step_contract: "Step".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(default)]
    status: Option<U64>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

/// Infer the protocol revision from deployed ABIs.
///
/// A `step` function taking three arguments means explicit-array stepping;
/// a `finishProofPhase` function means proofs must be closed explicitly.
/// Without ABIs the handle-addressed revision with a finish phase is assumed.
pub fn protocol_from_abi(memory_abi: Option<&Value>, step_abi: Option<&Value>) -> ProtocolDescriptor {
    let mut protocol = ProtocolDescriptor::default();
    if let Some(inputs) = step_abi.and_then(|abi| function_inputs(abi, "step")) {
        if inputs == 3 {
            protocol.step_shape = StepShape::ExplicitArray;
        }
    }
    if let Some(abi) = memory_abi {
        protocol.finish_phase = function_inputs(abi, "finishProofPhase").is_some();
    }
    protocol
}

/// Whether a JSON-RPC error reports the call reverting during execution,
/// as opposed to the node refusing the transaction.
fn is_execution_revert(code: i64, message: &str) -> bool {
    match code {
        3 => true,
        -32000 | -32603 => message.to_ascii_lowercase().contains("revert"),
        _ => false,
    }
}

fn function_inputs(abi: &Value, name: &str) -> Option<usize> {
    abi.as_array()?.iter().find_map(|entry| {
        let is_function = entry.get("type").and_then(Value::as_str) == Some("function");
        let matches = entry.get("name").and_then(Value::as_str) == Some(name);
        if is_function && matches {
            Some(entry.get("inputs").and_then(Value::as_array).map_or(0, Vec::len))
        } else {
            None
        }
    })
}

pub struct EvmAuthority {
    rpc: RpcClient,
    config: EvmConfig,
    memory: Address,
    step: Address,
    protocol: ProtocolDescriptor,
    accounts: Accounts,
}

impl EvmAuthority {
    /// Resolve both contracts, read the node's accounts and infer the protocol.
    pub fn connect(config: EvmConfig, resolver: &dyn AddressResolver) -> Result<Self> {
        let memory: Deployment = resolver.resolve(&config.memory_contract)?;
        let step: Deployment = resolver.resolve(&config.step_contract)?;
        let protocol = protocol_from_abi(memory.abi.as_ref(), step.abi.as_ref());

        let rpc = RpcClient::new(config.url.clone(), config.timeout)?;
        let available: Vec<Address> = rpc.rpc_request("eth_accounts", json!([]))?;
        let provider = *available.first().ok_or_else(|| {
            AuthorityError::Transport(format!("node at {} exposes no accounts", config.url))
        })?;
        let client = available.get(1).copied().unwrap_or(provider);

        debug!(
            memory = %memory.address,
            step = %step.address,
            ?protocol,
            "connected to {}",
            config.url
        );

        Ok(Self {
            rpc,
            memory: memory.address,
            step: step.address,
            protocol,
            accounts: Accounts { provider, client },
            config,
        })
    }

    fn send(&self, from: Address, to: Address, data: Vec<u8>) -> Result<Receipt> {
        let tx = json!({
            "from": from,
            "to": to,
            "gas": format!("{:#x}", self.config.gas),
            "data": Bytes::from(data),
        });
        match self.rpc.rpc_request::<B256>("eth_sendTransaction", json!([tx])) {
            Ok(hash) => self.wait_for_receipt(hash),
            // Nodes that simulate before mining reject failing calls here.
            Err(AuthorityError::JsonRpc { code, message }) if is_execution_revert(code, &message) => {
                Ok(Receipt::reverted(message))
            }
            Err(e) => Err(e),
        }
    }

    fn wait_for_receipt(&self, hash: B256) -> Result<Receipt> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            let receipt: Option<RpcReceipt> =
                self.rpc.rpc_request("eth_getTransactionReceipt", json!([hash]))?;
            if let Some(receipt) = receipt {
                return Ok(self.decode_receipt(receipt));
            }
            if Instant::now() >= deadline {
                return Err(AuthorityError::Timeout {
                    what: format!("receipt of {hash}"),
                    after: self.config.timeout,
                });
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    fn decode_receipt(&self, receipt: RpcReceipt) -> Receipt {
        let hash = receipt.transaction_hash;
        if receipt.status != Some(U64::from(1)) {
            return Receipt::reverted(format!("transaction {hash} reverted")).with_tx_hash(hash);
        }
        let events = receipt
            .logs
            .iter()
            .filter_map(|log| self.decode_log(log))
            .collect();
        Receipt::success(events).with_tx_hash(hash)
    }

    fn decode_log(&self, log: &RpcLog) -> Option<AuthorityEvent> {
        let topic = *log.topics.first()?;
        let topics = log.topics.iter().copied();
        let decoded = if log.address == self.memory && topic == IMemoryManager::MemoryCreated::SIGNATURE_HASH {
            IMemoryManager::MemoryCreated::decode_raw_log(topics, &log.data, true).map(|event| {
                AuthorityEvent::MemoryCreated {
                    handle: InstanceHandle(event._index),
                    root: event._initialHash,
                }
            })
        } else if log.address == self.memory && topic == IMemoryManager::HTIFExit::SIGNATURE_HASH {
            IMemoryManager::HTIFExit::decode_raw_log(topics, &log.data, true).map(|event| {
                AuthorityEvent::HtifExit {
                    handle: InstanceHandle(event._index),
                    exit_code: event._exitCode,
                }
            })
        } else if log.address == self.step && topic == IStep::StepStatus::SIGNATURE_HASH {
            IStep::StepStatus::decode_raw_log(topics, &log.data, true).map(|event| {
                AuthorityEvent::StepStatus {
                    cycle: event.cycle,
                    halt: event.halt,
                }
            })
        } else {
            return None;
        };

        match decoded {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(address = %log.address, "skipping undecodable log: {e}");
                None
            }
        }
    }

    fn call(&self, to: Address, data: Vec<u8>) -> Result<Bytes> {
        let call = json!({
            "from": self.accounts.provider,
            "to": to,
            "data": Bytes::from(data),
        });
        self.rpc.rpc_request("eth_call", json!([call, "latest"]))
    }
}

impl Authority for EvmAuthority {
    fn name(&self) -> &str {
        self.config.url.as_str()
    }

    fn protocol(&self) -> ProtocolDescriptor {
        self.protocol
    }

    fn accounts(&self) -> Result<Accounts> {
        Ok(self.accounts)
    }

    fn instantiate(&self, owner: Address, client: Address, root: Hash) -> Result<Receipt> {
        let data = IMemoryManager::instantiateCall {
            _owner: owner,
            _provider: client,
            _initialHash: root,
        }
        .abi_encode();
        self.send(self.accounts.provider, self.memory, data)
    }

    fn prove_read(
        &self,
        handle: InstanceHandle,
        address: u64,
        value: Word,
        root_to_leaf: &[Hash],
    ) -> Result<Receipt> {
        let data = IMemoryManager::proveReadCall {
            _index: handle.0,
            _position: address,
            _value: value,
            _proof: root_to_leaf.to_vec(),
        }
        .abi_encode();
        self.send(self.accounts.provider, self.memory, data)
    }

    fn prove_write(
        &self,
        handle: InstanceHandle,
        address: u64,
        old_value: Word,
        new_value: Word,
        root_to_leaf: &[Hash],
    ) -> Result<Receipt> {
        let data = IMemoryManager::proveWriteCall {
            _index: handle.0,
            _position: address,
            _oldValue: old_value,
            _newValue: new_value,
            _proof: root_to_leaf.to_vec(),
        }
        .abi_encode();
        self.send(self.accounts.provider, self.memory, data)
    }

    fn finish_proof_phase(&self, handle: InstanceHandle) -> Result<Receipt> {
        let data = IMemoryManager::finishProofPhaseCall { _index: handle.0 }.abi_encode();
        self.send(self.accounts.provider, self.memory, data)
    }

    fn replay_arrays(&self, handle: InstanceHandle) -> Result<ReplayArrays> {
        let data = IMemoryManager::getRWArraysCall { _index: handle.0 }.abi_encode();
        let output = self.call(self.memory, data)?;
        let returns = IMemoryManager::getRWArraysCall::abi_decode_returns(&output, true)
            .map_err(|e| AuthorityError::Decode(format!("getRWArrays: {e}")))?;
        Ok(ReplayArrays {
            positions: returns._0,
            values: returns._1,
            was_read: returns._2,
        })
    }

    fn step(&self, handle: InstanceHandle) -> Result<Receipt> {
        if self.protocol.step_shape != StepShape::HandleAddressed {
            return Err(AuthorityError::ProtocolMismatch(
                "handle-addressed step invoked on an explicit-array authority".to_string(),
            ));
        }
        let data = IStep::stepCall { _mmIndex: handle.0 }.abi_encode();
        self.send(self.accounts.client, self.step, data)
    }

    fn step_with_arrays(&self, arrays: &ReplayArrays) -> Result<Receipt> {
        if self.protocol.step_shape != StepShape::ExplicitArray {
            return Err(AuthorityError::ProtocolMismatch(
                "explicit-array step invoked on a handle-addressed authority".to_string(),
            ));
        }
        let data = IStepArrays::stepCall {
            _rwPositions: arrays.positions.clone(),
            _rwValues: arrays.values.clone(),
            _isRead: arrays.was_read.clone(),
        }
        .abi_encode();
        self.send(self.accounts.client, self.step, data)
    }

    fn write_word(&self, handle: InstanceHandle, address: u64, value: Word) -> Result<Receipt> {
        let data = IMemoryManager::writeCall {
            _index: handle.0,
            _position: address,
            _value: value,
        }
        .abi_encode();
        self.send(self.accounts.provider, self.memory, data)
    }

    fn htif_exit(&self, handle: InstanceHandle) -> Result<Receipt> {
        let data = IMemoryManager::htifExitCall { _index: handle.0 }.abi_encode();
        self.send(self.accounts.provider, self.memory, data)
    }

    fn snapshot(&self) -> Result<SnapshotId> {
        let id: U256 = self.rpc.rpc_request("evm_snapshot", json!([]))?;
        Ok(SnapshotId(format!("{id:#x}")))
    }

    fn revert(&self, snapshot: &SnapshotId) -> Result<()> {
        let reverted: bool = self.rpc.rpc_request("evm_revert", json!([snapshot.0]))?;
        if reverted {
            Ok(())
        } else {
            Err(AuthorityError::UnknownSnapshot(snapshot.to_string()))
        }
    }
}
