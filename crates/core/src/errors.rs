use thiserror::Error;

use crate::domain::approval::{
    ApprovalCategory, ApprovalId, ApprovalStatus, StepArenaError, SubjectType,
};
use crate::domain::principal::{PrincipalId, Role};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidStateReason {
    #[error("already decided: approval is {status}")]
    AlreadyDecided { status: ApprovalStatus },
    #[error("no pending approval step found")]
    NoPendingStep,
    #[error("step {requested} is not the current step (current step is {current})")]
    NotCurrentStep { requested: u32, current: u32 },
    #[error("concurrent modification: approval changed after version {expected_version} was read")]
    ConcurrentModification { expected_version: u32 },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ForbiddenReason {
    #[error("not your turn: step {sequence_number} awaits `{approver_role}`")]
    NotYourTurn { sequence_number: u32, approver_role: Role },
    #[error("only the requester or an admin/manager may cancel; `{principal}` is neither")]
    CancelNotPermitted { principal: PrincipalId },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("{category} approval requires an amount")]
    MissingAmount { category: ApprovalCategory },
    #[error("amount must not be negative")]
    NegativeAmount,
    #[error("request reason is required")]
    MissingRequestReason,
    #[error("request reason is {length} characters, limit is {max}")]
    RequestReasonTooLong { length: usize, max: usize },
    #[error("reason required for rejection")]
    RejectionReasonRequired,
    #[error(transparent)]
    Steps(#[from] StepArenaError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid state: {0}")]
    InvalidState(InvalidStateReason),
    #[error("forbidden: {0}")]
    Forbidden(ForbiddenReason),
    #[error("validation failed: {0}")]
    Validation(ValidationFailure),
    #[error("duplicate approval: `{existing}` is still pending for {subject_type} `{subject_id}`")]
    DuplicateApproval { subject_type: SubjectType, subject_id: String, existing: ApprovalId },
}

impl From<InvalidStateReason> for DomainError {
    fn from(value: InvalidStateReason) -> Self {
        Self::InvalidState(value)
    }
}

impl From<ForbiddenReason> for DomainError {
    fn from(value: ForbiddenReason) -> Self {
        Self::Forbidden(value)
    }
}

impl From<ValidationFailure> for DomainError {
    fn from(value: ValidationFailure) -> Self {
        Self::Validation(value)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("approval `{0}` not found")]
    NotFound(ApprovalId),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to act on this approval right now.",
            Self::NotFound { .. } => "The requested approval does not exist.",
            Self::Conflict { .. } => {
                "The approval is no longer in a state that allows this action. Reload and retry."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Validation(failure)) => {
                Self::BadRequest { message: failure.to_string(), correlation_id }
            }
            ApplicationError::Domain(DomainError::Forbidden(reason)) => {
                Self::Forbidden { message: reason.to_string(), correlation_id }
            }
            ApplicationError::Domain(
                error @ (DomainError::InvalidState(_) | DomainError::DuplicateApproval { .. }),
            ) => Self::Conflict { message: error.to_string(), correlation_id },
            ApplicationError::NotFound(id) => {
                Self::NotFound { message: format!("approval `{id}`"), correlation_id }
            }
            ApplicationError::Storage(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
