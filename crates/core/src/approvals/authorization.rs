use crate::domain::approval::{ApprovalRequest, ApprovalStep};
use crate::domain::principal::Principal;
use crate::errors::{DomainError, ForbiddenReason, InvalidStateReason};

/// Whether `principal` may decide the current step of `request`.
///
/// A bound approver principal matches by id; otherwise the step's role must
/// equal the principal's role. Requests without a current step are never
/// actionable.
pub fn can_act(principal: &Principal, request: &ApprovalRequest) -> bool {
    request.current_step().is_some_and(|step| step_admits(step, principal))
}

/// Requester or an elevated role may cancel while the request is open.
pub fn can_cancel(principal: &Principal, request: &ApprovalRequest) -> bool {
    !request.is_terminal()
        && (request.requested_by == principal.id || principal.role.is_elevated())
}

/// Resolves the current step and checks that `principal` may act on it.
pub fn authorize_step<'a>(
    principal: &Principal,
    request: &'a ApprovalRequest,
) -> Result<&'a ApprovalStep, DomainError> {
    if request.is_terminal() {
        return Err(InvalidStateReason::AlreadyDecided { status: request.status }.into());
    }
    let step = request.current_step().ok_or(InvalidStateReason::NoPendingStep)?;

    if !step_admits(step, principal) {
        return Err(ForbiddenReason::NotYourTurn {
            sequence_number: step.sequence_number,
            approver_role: step.approver_role,
        }
        .into());
    }

    Ok(step)
}

pub fn authorize_cancel(principal: &Principal, request: &ApprovalRequest) -> Result<(), DomainError> {
    if request.is_terminal() {
        return Err(InvalidStateReason::AlreadyDecided { status: request.status }.into());
    }
    if !can_cancel(principal, request) {
        return Err(ForbiddenReason::CancelNotPermitted { principal: principal.id.clone() }.into());
    }
    Ok(())
}

fn step_admits(step: &ApprovalStep, principal: &Principal) -> bool {
    if step.approver_principal.as_ref() == Some(&principal.id) {
        return true;
    }
    step.approver_role == principal.role
}
