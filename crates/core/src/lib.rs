pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use approvals::{
    ApprovalFactory, CompletionListener, DepartmentRef, NewApproval, StepAction, StepDecision,
    TransitionOutcome, WorkflowPolicy,
};
pub use domain::approval::{
    ApprovalCategory, ApprovalId, ApprovalRequest, ApprovalStatus, CompletionSignal, SubjectRef,
    SubjectSnapshot, SubjectType, TenantId, WorkflowMode,
};
pub use domain::principal::{Principal, PrincipalId, Role};
pub use errors::{ApplicationError, DomainError, InterfaceError};
