//! Invoking step transitions in either call shape.

use stepverify_authority::{
    Authority, InstanceHandle, ProtocolDescriptor, Receipt, ReplayArrays, StepShape,
};
use stepverify_core::{Outcome, Step};
use tracing::{debug, warn};

use crate::error::{ReplayError, Result};
use crate::session::RemoteSession;

/// Call shape requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShapeChoice {
    /// Use whatever the authority declares.
    #[default]
    Auto,
    Forced(StepShape),
}

/// Pick the call shape for a session. Forcing a shape the authority does not
/// declare is a configuration error.
pub fn negotiate(declared: ProtocolDescriptor, choice: ShapeChoice) -> Result<StepShape> {
    match choice {
        ShapeChoice::Auto => Ok(declared.step_shape),
        ShapeChoice::Forced(shape) if shape == declared.step_shape => Ok(shape),
        ShapeChoice::Forced(shape) => Err(ReplayError::Configuration(format!(
            "{shape} stepping requested but the authority declares {}",
            declared.step_shape
        ))),
    }
}

/// Strategy for invoking a step transition after its proofs are in.
pub trait StepInvoker {
    fn shape(&self) -> StepShape;

    /// Invoke the transition for `step`, whose accesses were proven against
    /// `handle`.
    fn invoke(&self, handle: InstanceHandle, step: &Step) -> Result<Receipt>;

    /// Invoke the transition for a step recorded without proofs.
    fn invoke_unproven(&self, step: &Step) -> Result<Receipt>;
}

/// `Step(handle)`.
pub struct HandleAddressed<'a, A> {
    session: &'a RemoteSession<A>,
}

impl<'a, A: Authority> HandleAddressed<'a, A> {
    pub fn new(session: &'a RemoteSession<A>) -> Self {
        Self { session }
    }
}

impl<A: Authority> StepInvoker for HandleAddressed<'_, A> {
    fn shape(&self) -> StepShape {
        StepShape::HandleAddressed
    }

    fn invoke(&self, handle: InstanceHandle, _step: &Step) -> Result<Receipt> {
        Ok(self.session.authority().step(handle)?)
    }

    fn invoke_unproven(&self, step: &Step) -> Result<Receipt> {
        Err(ReplayError::Configuration(format!(
            "handle-addressed stepping needs proofs, the step has {} bare accesses",
            step.accesses.len()
        )))
    }
}

/// `Step(positions, values, was_read)`, with the arrays read back from the
/// authority.
pub struct ExplicitArray<'a, A> {
    session: &'a RemoteSession<A>,
}

impl<'a, A: Authority> ExplicitArray<'a, A> {
    pub fn new(session: &'a RemoteSession<A>) -> Self {
        Self { session }
    }
}

impl<A: Authority> StepInvoker for ExplicitArray<'_, A> {
    fn shape(&self) -> StepShape {
        StepShape::ExplicitArray
    }

    fn invoke(&self, handle: InstanceHandle, step: &Step) -> Result<Receipt> {
        let arrays = self.session.authority().replay_arrays(handle)?;
        let expected = ReplayArrays::from_step(step);
        if arrays != expected {
            warn!(
                %handle,
                authority_len = arrays.len(),
                trace_len = expected.len(),
                "replay arrays differ from the trace"
            );
        }
        debug!(%handle, entries = arrays.len(), "stepping with explicit arrays");
        Ok(self.session.authority().step_with_arrays(&arrays)?)
    }

    /// Sequence files hold no proofs; their accesses are the arrays.
    fn invoke_unproven(&self, step: &Step) -> Result<Receipt> {
        let arrays = ReplayArrays::from_step(step);
        debug!(entries = arrays.len(), "stepping with arrays from the trace");
        Ok(self.session.authority().step_with_arrays(&arrays)?)
    }
}

/// Build the invoker for a negotiated shape.
pub fn invoker_for<'a, A: Authority>(
    session: &'a RemoteSession<A>,
    shape: StepShape,
) -> Box<dyn StepInvoker + 'a> {
    match shape {
        StepShape::HandleAddressed => Box::new(HandleAddressed::new(session)),
        StepShape::ExplicitArray => Box::new(ExplicitArray::new(session)),
    }
}

/// Classify a step receipt.
pub fn step_outcome(receipt: &Receipt) -> Outcome {
    match receipt.revert_reason() {
        None => Outcome::Success,
        Some(reason) => Outcome::reverted(reason),
    }
}
