//! Replaying the steps of a trace against an authority.

use serde::Serialize;
use stepverify_authority::{Authority, InstanceHandle, Receipt};
use stepverify_core::{AccessOutcome, Hash, Outcome, Step, Trace};
use tracing::{debug, info};

use crate::error::Result;
use crate::instance::{finish_proof_phase, open_for_replay, Opened};
use crate::proof::replay_accesses;
use crate::session::RemoteSession;
use crate::step::{step_outcome, StepInvoker};

/// Result of replaying one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    /// Index of the step within its trace.
    pub index: usize,
    pub outcome: Outcome,
    pub accesses: Vec<AccessOutcome>,
    /// Cycle reported by the step's status event, if it emitted one.
    pub cycle: Option<u64>,
}

impl StepResult {
    fn failed(index: usize, reason: String) -> Self {
        Self {
            index,
            outcome: Outcome::reverted(reason),
            accesses: Vec::new(),
            cycle: None,
        }
    }

    fn from_receipt(index: usize, accesses: Vec<AccessOutcome>, receipt: &Receipt) -> Self {
        Self {
            index,
            outcome: step_outcome(receipt),
            accesses,
            cycle: receipt.step_status().ok().map(|status| status.cycle),
        }
    }

    pub fn rejected_accesses(&self) -> usize {
        self.accesses.iter().filter(|a| !a.is_accepted()).count()
    }
}

/// Replays steps against instances opened for them.
///
/// When every replayed step of a trace declares its own root, each step gets
/// a fresh instance at that root. Otherwise the steps share one instance,
/// opened at the nearest declared root before the first of them; steps
/// between that root and the first replayed step are replayed unreported.
/// Steps recorded without proofs go straight to the step transition.
pub struct TraceReplayer<'a, A> {
    session: &'a RemoteSession<A>,
    invoker: &'a dyn StepInvoker,
}

/// An instance ready for a step, or the result of failing to get one.
type Positioned = std::result::Result<InstanceHandle, StepResult>;

fn unproven(step: &Step) -> bool {
    !step.accesses.is_empty() && !step.carries_proofs()
}

impl<'a, A: Authority> TraceReplayer<'a, A> {
    pub fn new(session: &'a RemoteSession<A>, invoker: &'a dyn StepInvoker) -> Self {
        Self { session, invoker }
    }

    /// Replay a single step on a fresh instance at `root`.
    ///
    /// Rejected accesses do not stop the step; the step transition is still
    /// invoked and its outcome is the step's outcome.
    pub fn replay_step(&self, index: usize, step: &Step, root: Hash) -> Result<StepResult> {
        if unproven(step) {
            return self.replay_unproven(index, step);
        }
        match self.open(index, root)? {
            Ok(handle) => self.replay_on(handle, index, step),
            Err(failed) => Ok(failed),
        }
    }

    /// Replay step `index` of `trace` on an instance of its own, brought to
    /// the state the step starts from.
    pub fn replay_isolated(&self, trace: &Trace, index: usize) -> Result<StepResult> {
        let step = &trace.steps[index];
        if unproven(step) {
            return self.replay_unproven(index, step);
        }
        match self.position(&trace.steps, index, initial_root(trace))? {
            Ok(handle) => self.replay_on(handle, index, step),
            Err(failed) => Ok(failed),
        }
    }

    /// Replay the steps of `trace` in order, starting at `first`, until one
    /// reverts. `on_step` sees every result as soon as it is known.
    pub fn replay_all(
        &self,
        trace: &Trace,
        first: usize,
        mut on_step: impl FnMut(&StepResult),
    ) -> Result<Vec<StepResult>> {
        let fresh = trace.roots_every_step(first);
        let initial_root = initial_root(trace);
        debug!(trace = %trace.name, fresh, "replaying trace");

        let mut results = Vec::with_capacity(trace.steps.len().saturating_sub(first));
        let mut shared = None;
        for (index, step) in trace.steps.iter().enumerate().skip(first) {
            let result = if fresh || unproven(step) {
                self.replay_step(index, step, step.root_hash().unwrap_or(initial_root))?
            } else {
                let positioned = match shared {
                    Some(handle) => Ok(handle),
                    None => self.position(&trace.steps, index, initial_root)?,
                };
                match positioned {
                    Ok(handle) => {
                        shared = Some(handle);
                        self.replay_on(handle, index, step)?
                    }
                    Err(failed) => failed,
                }
            };
            on_step(&result);
            let reverted = result.outcome.is_reverted();
            results.push(result);
            if reverted {
                info!(index, "step reverted, stopping trace");
                break;
            }
        }
        Ok(results)
    }

    fn open(&self, index: usize, root: Hash) -> Result<Positioned> {
        Ok(match open_for_replay(self.session, root)? {
            Opened::Ready(handle) => Ok(handle),
            Opened::Reverted(reason) => {
                Err(StepResult::failed(index, format!("instantiate: {reason}")))
            }
        })
    }

    /// Open an instance holding the state `steps[target]` starts from.
    fn position(&self, steps: &[Step], target: usize, initial_root: Hash) -> Result<Positioned> {
        let (start, root) = steps[..=target]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, step)| step.root_hash().map(|root| (index, root)))
            .unwrap_or((0, initial_root));
        let handle = match self.open(target, root)? {
            Ok(handle) => handle,
            Err(failed) => return Ok(Err(failed)),
        };

        for (index, step) in steps.iter().enumerate().take(target).skip(start) {
            let result = self.replay_on(handle, index, step)?;
            if let Outcome::Reverted { reason } = result.outcome {
                return Ok(Err(StepResult::failed(
                    target,
                    format!("step {index} reverted before it: {reason}"),
                )));
            }
        }
        debug!(%handle, target, replayed = target - start, "instance positioned");
        Ok(Ok(handle))
    }

    fn replay_on(&self, handle: InstanceHandle, index: usize, step: &Step) -> Result<StepResult> {
        let accesses = replay_accesses(self.session, handle, &step.accesses)?;

        if self.session.protocol().finish_phase {
            if let Some(reason) = finish_proof_phase(self.session, handle)? {
                return Ok(StepResult {
                    accesses,
                    ..StepResult::failed(index, format!("finishProofPhase: {reason}"))
                });
            }
        }

        let receipt = self.invoker.invoke(handle, step)?;
        let result = StepResult::from_receipt(index, accesses, &receipt);
        debug!(index, %handle, outcome = %result.outcome, "step replayed");
        Ok(result)
    }

    fn replay_unproven(&self, index: usize, step: &Step) -> Result<StepResult> {
        let receipt = self.invoker.invoke_unproven(step)?;
        let result = StepResult::from_receipt(index, Vec::new(), &receipt);
        debug!(index, outcome = %result.outcome, "unproven step replayed");
        Ok(result)
    }
}

fn initial_root(trace: &Trace) -> Hash {
    trace.initial_root().unwrap_or(Hash::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::HandleAddressed;
    use stepverify_authority::{MemoryAuthority, SparseMemory, StepPolicy};
    use stepverify_core::Word;

    #[test]
    fn step_succeeds_despite_rejected_access_when_authority_allows() {
        let session =
            RemoteSession::open(MemoryAuthority::default().with_policy(StepPolicy::AcceptAll))
                .unwrap();
        let invoker = HandleAddressed::new(&session);
        let replayer = TraceReplayer::new(&session, &invoker);

        let mut producer = SparseMemory::new(8);
        let mut access = producer.record_write(0x10, Word::repeat_byte(1));
        access.read = Word::repeat_byte(0x42);
        let step = Step::new(vec![access]);

        let result = replayer.replay_step(0, &step, Hash::ZERO).unwrap();
        assert_eq!(result.rejected_accesses(), 1);
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.cycle, Some(1));
    }

    #[test]
    fn step_reverts_despite_accepted_accesses_when_authority_refuses() {
        let authority = MemoryAuthority::default();
        authority.reject_next_steps(1);
        let session = RemoteSession::open(authority).unwrap();
        let invoker = HandleAddressed::new(&session);
        let replayer = TraceReplayer::new(&session, &invoker);

        let mut producer = SparseMemory::new(8);
        let step = Step::new(vec![producer.record_write(0x10, Word::repeat_byte(1))]);

        let result = replayer.replay_step(0, &step, Hash::ZERO).unwrap();
        assert_eq!(result.rejected_accesses(), 0);
        assert!(result.outcome.is_reverted());
    }

    #[test]
    fn replay_all_stops_at_first_revert() {
        let authority = MemoryAuthority::default();
        let session = RemoteSession::open(authority).unwrap();
        let invoker = HandleAddressed::new(&session);
        let replayer = TraceReplayer::new(&session, &invoker);

        let mut producer = SparseMemory::new(8);
        let first = Step::new(vec![producer.record_write(0x8, Word::repeat_byte(1))]);
        let mut broken = producer.record_read(0x8);
        broken.read = Word::ZERO;
        let second = Step::new(vec![broken]);
        let third = Step::new(vec![producer.record_read(0x8)]);
        let mut seen = 0;

        let trace = Trace::new("t", "t.json", vec![first, second, third]);
        let results = replayer.replay_all(&trace, 0, |_| seen += 1).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(seen, 2);
        assert!(results[0].outcome.is_success());
        assert!(results[1].outcome.is_reverted());
    }
}
