//! On-disk JSON representation of trace files.
//!
//! Trace producers have used two key schemes for the access operation
//! (`operation: "READ" | "WRITE"` and `type: "read" | ...`) and have put the
//! address either inside `proof` or next to it. The raw types here accept all
//! of them; conversion into [`crate::trace`] types normalizes them so nothing
//! downstream has to care.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::trace::{AccessKind, CycleSpan, Hash, MemoryAccess, Proof, SiblingPath, Step, Word};

/// A byte address written as a JSON number or a hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAddress(pub u64);

impl<'de> Deserialize<'de> for RawAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(RawAddress(value)),
            Repr::Text(text) => parse_address(&text)
                .map(RawAddress)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid address `{text}`"))),
        }
    }
}

impl Serialize for RawAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProof {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<RawAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_hash: Option<Hash>,
    #[serde(default)]
    pub sibling_hashes: Vec<Hash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAccess {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<RawAddress>,
    #[serde(default)]
    pub proof: RawProof,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Word>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written: Option<Word>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStep {
    #[serde(default)]
    pub accesses: Vec<RawAccess>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brackets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_cycles: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_cycles: Option<u64>,
}

/// A named test sequence; sequence files hold an array of these.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSequence {
    pub test: String,
    #[serde(default)]
    pub period: Option<u64>,
    #[serde(default)]
    pub start: Option<u64>,
    pub steps: Vec<RawStep>,
}

impl RawAccess {
    fn access_kind(&self) -> Result<AccessKind, String> {
        if let Some(operation) = &self.operation {
            return if operation.eq_ignore_ascii_case("read") {
                Ok(AccessKind::Read)
            } else if operation.eq_ignore_ascii_case("write") {
                Ok(AccessKind::Write)
            } else {
                Err(format!("unknown operation `{operation}`"))
            };
        }
        match &self.kind {
            Some(kind) if kind.eq_ignore_ascii_case("read") => Ok(AccessKind::Read),
            Some(_) => Ok(AccessKind::Write),
            None => Err("access has neither `operation` nor `type`".to_string()),
        }
    }

    pub fn into_access(self) -> Result<MemoryAccess, String> {
        let kind = self.access_kind()?;
        let address = self
            .proof
            .address
            .or(self.address)
            .ok_or("access is missing `proof.address`")?
            .0;
        let read = self.read.ok_or("access is missing `read`")?;
        let proof = Proof {
            root_hash: self.proof.root_hash,
            siblings: SiblingPath::from_leaf_to_root(self.proof.sibling_hashes),
        };

        match kind {
            AccessKind::Read => Ok(MemoryAccess::read(address, read, proof)),
            AccessKind::Write => {
                let written = self.written.ok_or("write access is missing `written`")?;
                Ok(MemoryAccess::write(address, read, written, proof))
            }
        }
    }
}

impl From<&MemoryAccess> for RawAccess {
    fn from(access: &MemoryAccess) -> Self {
        let operation = match access.kind {
            AccessKind::Read => "READ",
            AccessKind::Write => "WRITE",
        };
        Self {
            operation: Some(operation.to_string()),
            kind: None,
            address: None,
            proof: RawProof {
                address: Some(RawAddress(access.address)),
                root_hash: access.proof.root_hash,
                sibling_hashes: access.proof.siblings.leaf_to_root().to_vec(),
            },
            read: Some(access.read),
            written: access.written,
        }
    }
}

impl RawStep {
    pub fn into_step(self) -> Result<Step, String> {
        let accesses = self
            .accesses
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.into_access().map_err(|e| format!("access {index}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;

        let cycles = match (self.init_cycles, self.final_cycles) {
            (Some(start), Some(end)) => Some(CycleSpan { start, end }),
            _ => None,
        };

        Ok(Step {
            accesses,
            brackets: self.brackets.unwrap_or_default(),
            cycles,
        })
    }
}

impl From<&Step> for RawStep {
    fn from(step: &Step) -> Self {
        Self {
            accesses: step.accesses.iter().map(RawAccess::from).collect(),
            brackets: (!step.brackets.is_empty()).then(|| step.brackets.clone()),
            init_cycles: step.cycles.map(|c| c.start),
            final_cycles: step.cycles.map(|c| c.end),
        }
    }
}

/// Render steps in the canonical trace file format.
pub fn to_json(steps: &[Step]) -> serde_json::Result<String> {
    let raw: Vec<RawStep> = steps.iter().map(RawStep::from).collect();
    serde_json::to_string_pretty(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_access(json: &str) -> Result<MemoryAccess, String> {
        let raw: RawAccess = serde_json::from_str(json).map_err(|e| e.to_string())?;
        raw.into_access()
    }

    #[test]
    fn accepts_operation_key_scheme() {
        let access = parse_access(
            r#"{"operation": "WRITE", "read": "0x0000000000000000",
                "written": "0x0101010101010101",
                "proof": {"address": 16, "sibling_hashes": []}}"#,
        )
        .unwrap();
        assert_eq!(access.kind, AccessKind::Write);
        assert_eq!(access.address, 0x10);
        assert_eq!(access.written, Some(Word::repeat_byte(1)));
    }

    #[test]
    fn accepts_type_key_scheme() {
        let read = parse_access(
            r#"{"type": "read", "read": "0x0000000000000001",
                "proof": {"address": "0x20"}}"#,
        )
        .unwrap();
        assert_eq!(read.kind, AccessKind::Read);
        assert_eq!(read.address, 0x20);

        // Anything that is not "read" under the `type` key is a write.
        let write = parse_access(
            r#"{"type": "store", "address": 8, "read": "0x0000000000000000",
                "written": "0x0000000000000002"}"#,
        )
        .unwrap();
        assert_eq!(write.kind, AccessKind::Write);
        assert_eq!(write.address, 8);
    }

    #[test]
    fn operation_values_are_case_insensitive() {
        let access = parse_access(
            r#"{"operation": "Read", "read": "0x0000000000000000", "proof": {"address": 0}}"#,
        )
        .unwrap();
        assert!(access.kind.is_read());
    }

    #[test]
    fn rejects_incomplete_accesses() {
        let missing_written = parse_access(
            r#"{"operation": "WRITE", "read": "0x0000000000000000", "proof": {"address": 0}}"#,
        );
        assert!(missing_written.unwrap_err().contains("written"));

        let missing_kind = parse_access(r#"{"read": "0x0000000000000000", "proof": {"address": 0}}"#);
        assert!(missing_kind.is_err());

        let unknown = parse_access(
            r#"{"operation": "SWAP", "read": "0x0000000000000000", "proof": {"address": 0}}"#,
        );
        assert!(unknown.unwrap_err().contains("SWAP"));
    }

    #[test]
    fn canonical_output_parses_back() {
        let access = parse_access(
            r#"{"type": "write", "read": "0x0000000000000000",
                "written": "0x0101010101010101",
                "proof": {"address": 16, "root_hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
                          "sibling_hashes": ["0x2222222222222222222222222222222222222222222222222222222222222222"]}}"#,
        )
        .unwrap();
        let step = Step::new(vec![access]).with_brackets(vec!["main".into()]);

        let json = to_json(std::slice::from_ref(&step)).unwrap();
        let raw: Vec<RawStep> = serde_json::from_str(&json).unwrap();
        let parsed = raw.into_iter().next().unwrap().into_step().unwrap();
        assert_eq!(parsed, step);
    }
}
