//! The connection every replay component works through.

use stepverify_authority::{Accounts, Authority, ProtocolDescriptor};
use tracing::debug;

use crate::error::Result;

/// A sequential session with one authority.
///
/// Every component takes the session explicitly; separate sessions can
/// coexist, while calls within one session are strictly ordered.
pub struct RemoteSession<A> {
    authority: A,
    accounts: Accounts,
    protocol: ProtocolDescriptor,
}

impl<A: Authority> RemoteSession<A> {
    /// Open a session, reading the accounts and the declared protocol.
    pub fn open(authority: A) -> Result<Self> {
        let accounts = authority.accounts()?;
        let protocol = authority.protocol();
        debug!(
            authority = authority.name(),
            provider = %accounts.provider,
            client = %accounts.client,
            shape = %protocol.step_shape,
            finish_phase = protocol.finish_phase,
            "session opened"
        );
        Ok(Self {
            authority,
            accounts,
            protocol,
        })
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub fn accounts(&self) -> Accounts {
        self.accounts
    }

    pub fn protocol(&self) -> ProtocolDescriptor {
        self.protocol
    }

    pub fn into_inner(self) -> A {
        self.authority
    }
}
