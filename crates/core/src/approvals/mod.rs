//! Approval workflow rules: step selection, request construction, the
//! authorization predicate and the step state machine.

pub mod authorization;
pub mod completion;
pub mod factory;
pub mod transition;
pub mod workflow;

pub use authorization::{authorize_cancel, authorize_step, can_act, can_cancel};
pub use completion::{CompletionListener, InMemoryCompletionListener, NoopCompletionListener};
pub use factory::{ensure_no_pending_duplicate, ApprovalFactory, DepartmentRef, NewApproval};
pub use transition::{
    aggregate_status, apply_decision, cancel, ApprovalAction, StepAction, StepDecision,
    TransitionOutcome,
};
pub use workflow::{select_steps, WorkflowPolicy};
