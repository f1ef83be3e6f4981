//! Copying images into an instance word by word.

use std::fs;
use std::path::Path;

use stepverify_authority::tree::WORD_SIZE;
use stepverify_authority::{Authority, InstanceHandle};
use stepverify_core::Word;
use tracing::{debug, info};

use crate::error::{ReplayError, Result};
use crate::observer::ReplayObserver;
use crate::retry::RetryPolicy;
use crate::session::RemoteSession;

/// Split `bytes` into words, zero-padding a trailing partial word.
pub fn words(bytes: &[u8]) -> impl Iterator<Item = Word> + '_ {
    bytes.chunks(WORD_SIZE as usize).map(|chunk| {
        let mut word = Word::ZERO;
        word.0[..chunk.len()].copy_from_slice(chunk);
        word
    })
}

pub struct BulkLoader<'a, A> {
    session: &'a RemoteSession<A>,
    retry: RetryPolicy,
}

impl<'a, A: Authority> BulkLoader<'a, A> {
    pub fn new(session: &'a RemoteSession<A>, retry: RetryPolicy) -> Self {
        Self { session, retry }
    }

    /// Write `bytes` starting at `position`. Returns the number of words written.
    pub fn load_bytes(
        &self,
        handle: InstanceHandle,
        position: u64,
        bytes: &[u8],
        observer: &dyn ReplayObserver,
    ) -> Result<u64> {
        if position % WORD_SIZE != 0 {
            return Err(ReplayError::Load(format!(
                "position {position:#x} is not word aligned"
            )));
        }

        let total = bytes.len() as u64;
        let mut address = position;
        let mut written = 0;
        for word in words(bytes) {
            let receipt = self.retry.run("write", || {
                self.session.authority().write_word(handle, address, word)
            })?;
            if let Some(reason) = receipt.revert_reason() {
                return Err(ReplayError::Load(format!(
                    "write at {address:#x} reverted: {reason}"
                )));
            }
            written += 1;
            address += WORD_SIZE;
            observer.on_load_progress(position, (written * WORD_SIZE).min(total), total);
        }
        debug!(%handle, position, words = written, "bytes loaded");
        Ok(written)
    }

    pub fn load_file(
        &self,
        handle: InstanceHandle,
        position: u64,
        path: &Path,
        observer: &dyn ReplayObserver,
    ) -> Result<u64> {
        let bytes = fs::read(path).map_err(stepverify_core::Error::from)?;
        info!(path = %path.display(), position, bytes = bytes.len(), "loading image");
        self.load_bytes(handle, position, &bytes, observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{open_for_replay, Opened};
    use crate::observer::NoopObserver;
    use stepverify_authority::MemoryAuthority;
    use stepverify_core::Hash;

    #[test]
    fn trailing_partial_word_is_zero_padded() {
        let words: Vec<Word> = words(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).collect();
        assert_eq!(words.len(), 2);
        assert_eq!(words[1], Word::from([9, 0, 0, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn misaligned_position_is_refused() {
        let session = RemoteSession::open(MemoryAuthority::default()).unwrap();
        let Opened::Ready(handle) = open_for_replay(&session, Hash::ZERO).unwrap() else {
            panic!("expected an instance");
        };
        let loader = BulkLoader::new(&session, RetryPolicy::never());
        assert!(matches!(
            loader.load_bytes(handle, 3, &[0; 8], &NoopObserver),
            Err(ReplayError::Load(_))
        ));
        assert_eq!(
            loader.load_bytes(handle, 0x1000, &[0; 20], &NoopObserver).unwrap(),
            3
        );
    }
}
