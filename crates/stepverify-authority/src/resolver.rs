//! Locating deployed contracts.

use alloy_primitives::Address;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AuthorityError, Result};

/// A deployed contract: where it lives and, when known, its ABI.
#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    pub name: String,
    pub address: Address,
    pub abi: Option<Value>,
}

/// Supplies the location of an authority's entry points.
pub trait AddressResolver {
    fn resolve(&self, contract: &str) -> Result<Deployment>;
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path)
        .map_err(|e| AuthorityError::Resolver(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| AuthorityError::Resolver(format!("{}: {e}", path.display())))
}

/// A deployment directory holding one `<Contract>.json` per contract, each
/// with an `address` and an `abi`.
#[derive(Debug, Clone)]
pub struct DeploymentsDir {
    dir: PathBuf,
}

#[derive(Deserialize)]
struct DeploymentFile {
    address: Address,
    #[serde(default)]
    abi: Option<Value>,
}

impl DeploymentsDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl AddressResolver for DeploymentsDir {
    fn resolve(&self, contract: &str) -> Result<Deployment> {
        let file: DeploymentFile = read_json(&self.dir.join(format!("{contract}.json")))?;
        Ok(Deployment {
            name: contract.to_string(),
            address: file.address,
            abi: file.abi,
        })
    }
}

/// Build artifacts that record the address per network id under
/// `networks.<id>.address`.
#[derive(Debug, Clone)]
pub struct NetworkArtifacts {
    dir: PathBuf,
    network_id: String,
}

#[derive(Deserialize)]
struct ArtifactFile {
    #[serde(default)]
    abi: Option<Value>,
    #[serde(default)]
    networks: HashMap<String, NetworkEntry>,
}

#[derive(Deserialize)]
struct NetworkEntry {
    address: Address,
}

impl NetworkArtifacts {
    pub fn new(dir: impl Into<PathBuf>, network_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            network_id: network_id.into(),
        }
    }
}

impl AddressResolver for NetworkArtifacts {
    fn resolve(&self, contract: &str) -> Result<Deployment> {
        let path = self.dir.join(format!("{contract}.json"));
        let artifact: ArtifactFile = read_json(&path)?;
        let entry = artifact.networks.get(&self.network_id).ok_or_else(|| {
            AuthorityError::Resolver(format!(
                "{contract} is not deployed on network {} ({})",
                self.network_id,
                path.display()
            ))
        })?;
        Ok(Deployment {
            name: contract.to_string(),
            address: entry.address,
            abi: artifact.abi,
        })
    }
}

/// Fixed table of deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Deployment>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, address: Address, abi: Option<Value>) -> Self {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            Deployment {
                name,
                address,
                abi,
            },
        );
        self
    }
}

impl AddressResolver for StaticResolver {
    fn resolve(&self, contract: &str) -> Result<Deployment> {
        self.entries
            .get(contract)
            .cloned()
            .ok_or_else(|| AuthorityError::Resolver(format!("no address known for {contract}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_deployment_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Step.json"),
            json!({
                "address": "0x00000000000000000000000000000000000000aa",
                "abi": [{"type": "function", "name": "step", "inputs": [{}]}]
            })
            .to_string(),
        )
        .unwrap();

        let deployment = DeploymentsDir::new(dir.path()).resolve("Step").unwrap();
        assert_eq!(deployment.address, Address::with_last_byte(0xaa));
        assert!(deployment.abi.is_some());
        assert!(matches!(
            DeploymentsDir::new(dir.path()).resolve("MMInstantiator"),
            Err(AuthorityError::Resolver(_))
        ));
    }

    #[test]
    fn reads_address_for_network_id() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("MMInstantiator.json"),
            json!({
                "abi": [],
                "networks": {"7777": {"address": "0x00000000000000000000000000000000000000bb"}}
            })
            .to_string(),
        )
        .unwrap();

        let found = NetworkArtifacts::new(dir.path(), "7777")
            .resolve("MMInstantiator")
            .unwrap();
        assert_eq!(found.address, Address::with_last_byte(0xbb));
        assert!(NetworkArtifacts::new(dir.path(), "1")
            .resolve("MMInstantiator")
            .is_err());
    }

    #[test]
    fn static_resolver_knows_only_its_entries() {
        let resolver = StaticResolver::new().with("Step", Address::with_last_byte(1), None);
        assert_eq!(resolver.resolve("Step").unwrap().address, Address::with_last_byte(1));
        assert!(resolver.resolve("MMInstantiator").is_err());
    }
}
