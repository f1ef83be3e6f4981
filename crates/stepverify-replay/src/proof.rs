//! Forwarding Merkle proofs to the authority.

use stepverify_authority::{Authority, InstanceHandle};
use stepverify_core::{AccessKind, AccessOutcome, MemoryAccess};
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::RemoteSession;

/// Submit one access. The proof is not checked locally; the authority's
/// verdict is returned as the outcome.
pub fn replay_access<A: Authority>(
    session: &RemoteSession<A>,
    handle: InstanceHandle,
    access: &MemoryAccess,
) -> Result<AccessOutcome> {
    let siblings = access.proof.siblings.root_to_leaf();
    let authority = session.authority();
    let receipt = match access.kind {
        AccessKind::Read => authority.prove_read(handle, access.address, access.read, &siblings)?,
        AccessKind::Write => authority.prove_write(
            handle,
            access.address,
            access.read,
            access.resulting_value(),
            &siblings,
        )?,
    };

    match receipt.revert_reason() {
        None => {
            debug!(%handle, address = access.address, kind = ?access.kind, "access accepted");
            Ok(AccessOutcome::Accepted)
        }
        Some(reason) => {
            warn!(%handle, address = access.address, kind = ?access.kind, %reason, "access reverted");
            Ok(AccessOutcome::Rejected {
                reason: reason.to_string(),
            })
        }
    }
}

/// Submit every access of a step in order. Rejections do not stop the
/// remaining accesses.
pub fn replay_accesses<A: Authority>(
    session: &RemoteSession<A>,
    handle: InstanceHandle,
    accesses: &[MemoryAccess],
) -> Result<Vec<AccessOutcome>> {
    accesses
        .iter()
        .map(|access| replay_access(session, handle, access))
        .collect()
}
