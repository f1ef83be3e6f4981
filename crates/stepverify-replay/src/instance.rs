//! Opening memory instances and closing their proof phase.

use alloy_primitives::Address;
use stepverify_authority::{Authority, AuthorityError, InstanceHandle};
use stepverify_core::Hash;
use tracing::debug;

use crate::error::{ReplayError, Result};
use crate::session::RemoteSession;

/// Result of asking the authority for a new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    Ready(InstanceHandle),
    /// The authority refused the instantiation.
    Reverted(String),
}

/// Open an instance bound to `root` and resolve its handle from the
/// creation event.
pub fn open_instance<A: Authority>(
    session: &RemoteSession<A>,
    owner: Address,
    client: Address,
    root: Hash,
) -> Result<Opened> {
    let receipt = session
        .authority()
        .instantiate(owner, client, root)
        .map_err(|e| instance_error("instantiate", e))?;
    if let Some(reason) = receipt.revert_reason() {
        return Ok(Opened::Reverted(reason.to_string()));
    }
    let handle = receipt
        .created_instance()
        .map_err(|e| instance_error("instantiate", e))?;
    debug!(%handle, %root, "instance opened");
    Ok(Opened::Ready(handle))
}

/// Open an instance owned by the session's provider for replaying a trace.
pub fn open_for_replay<A: Authority>(session: &RemoteSession<A>, root: Hash) -> Result<Opened> {
    let accounts = session.accounts();
    open_instance(session, accounts.provider, accounts.client, root)
}

/// Close the proof phase. Returns the revert reason if the authority refused.
pub fn finish_proof_phase<A: Authority>(
    session: &RemoteSession<A>,
    handle: InstanceHandle,
) -> Result<Option<String>> {
    let receipt = session.authority().finish_proof_phase(handle)?;
    Ok(receipt.revert_reason().map(str::to_string))
}

fn instance_error(call: &str, err: AuthorityError) -> ReplayError {
    ReplayError::Instance(format!("{call}: {err}"))
}
