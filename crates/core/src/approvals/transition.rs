use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::authorization::{authorize_cancel, authorize_step};
use crate::domain::approval::{
    ApprovalId, ApprovalRequest, ApprovalStatus, ApprovalSteps, CompletionSignal, StepStatus,
};
use crate::domain::principal::Principal;
use crate::errors::{DomainError, InvalidStateReason, ValidationFailure};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Approve,
    Reject,
    Skip,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Skip => "skip",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }

    fn step_status(&self) -> StepStatus {
        match self {
            Self::Approve => StepStatus::Approved,
            Self::Reject => StepStatus::Rejected,
            Self::Skip => StepStatus::Skipped,
        }
    }
}

/// Every mutation the engine records against a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
    Skip,
    Cancel,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Skip => "skip",
            Self::Cancel => "cancel",
        }
    }
}

impl From<StepAction> for ApprovalAction {
    fn from(value: StepAction) -> Self {
        match value {
            StepAction::Approve => Self::Approve,
            StepAction::Reject => Self::Reject,
            StepAction::Skip => Self::Skip,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepDecision {
    pub action: StepAction,
    pub comments: Option<String>,
    /// Step the caller believes is current; checked before anything is written.
    pub expected_step: Option<u32>,
}

impl StepDecision {
    pub fn new(action: StepAction) -> Self {
        Self { action, comments: None, expected_step: None }
    }

    pub fn approve() -> Self {
        Self::new(StepAction::Approve)
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self::new(StepAction::Reject).with_comments(reason)
    }

    pub fn skip() -> Self {
        Self::new(StepAction::Skip)
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn at_step(mut self, sequence_number: u32) -> Self {
        self.expected_step = Some(sequence_number);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub approval_id: ApprovalId,
    pub action: ApprovalAction,
    pub sequence_number: Option<u32>,
    pub from: ApprovalStatus,
    pub to: ApprovalStatus,
    pub completion: Option<CompletionSignal>,
}

impl TransitionOutcome {
    pub fn reached_terminal(&self) -> bool {
        self.completion.is_some()
    }
}

/// Overall status implied by the steps alone.
pub fn aggregate_status(steps: &ApprovalSteps) -> ApprovalStatus {
    if steps.any_rejected() {
        ApprovalStatus::Rejected
    } else if steps.all_resolved() {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::Pending
    }
}

/// Applies one step decision. On error the request is left untouched.
pub fn apply_decision(
    request: &mut ApprovalRequest,
    principal: &Principal,
    decision: &StepDecision,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, DomainError> {
    if request.is_terminal() {
        return Err(InvalidStateReason::AlreadyDecided { status: request.status }.into());
    }
    let current = request.current_step().ok_or(InvalidStateReason::NoPendingStep)?;
    if let Some(requested) = decision.expected_step {
        if requested != current.sequence_number {
            return Err(InvalidStateReason::NotCurrentStep {
                requested,
                current: current.sequence_number,
            }
            .into());
        }
    }
    let sequence_number = authorize_step(principal, request)?.sequence_number;

    let comments = decision
        .comments
        .as_deref()
        .map(str::trim)
        .filter(|comments| !comments.is_empty())
        .map(str::to_owned);
    if decision.action == StepAction::Reject && comments.is_none() {
        return Err(ValidationFailure::RejectionReasonRequired.into());
    }

    let from = request.status;
    request
        .steps
        .record_decision(sequence_number, decision.action.step_status(), comments, now)
        .ok_or(InvalidStateReason::NoPendingStep)?;

    let to = aggregate_status(&request.steps);
    request.status = to;
    if to.is_terminal() {
        request.completed_at = Some(now);
    }
    touch(request, now);

    Ok(TransitionOutcome {
        approval_id: request.id.clone(),
        action: decision.action.into(),
        sequence_number: Some(sequence_number),
        from,
        to,
        completion: request.completion_signal(),
    })
}

/// Cancels an open request. Steps keep whatever status they had.
pub fn cancel(
    request: &mut ApprovalRequest,
    principal: &Principal,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, DomainError> {
    authorize_cancel(principal, request)?;

    let from = request.status;
    request.status = ApprovalStatus::Cancelled;
    request.completed_at = Some(now);
    touch(request, now);

    Ok(TransitionOutcome {
        approval_id: request.id.clone(),
        action: ApprovalAction::Cancel,
        sequence_number: None,
        from,
        to: request.status,
        completion: request.completion_signal(),
    })
}

fn touch(request: &mut ApprovalRequest, now: DateTime<Utc>) {
    request.updated_at = now;
    request.version += 1;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{aggregate_status, apply_decision, cancel, ApprovalAction, StepAction, StepDecision};
    use crate::approvals::factory::{ApprovalFactory, NewApproval};
    use crate::domain::approval::{
        ApprovalRequest, ApprovalStatus, StepStatus, SubjectSnapshot, SubjectType, TenantId,
        WorkflowMode,
    };
    use crate::domain::principal::{Principal, PrincipalId, Role};
    use crate::errors::{DomainError, ForbiddenReason, InvalidStateReason, ValidationFailure};

    fn expense(amount: i64, mode: WorkflowMode) -> ApprovalRequest {
        ApprovalFactory::default()
            .expense(
                "exp-1",
                NewApproval::new(TenantId("acme".to_owned()), PrincipalId("u-req".to_owned()))
                    .with_snapshot(
                        SubjectSnapshot::new()
                            .with_decimal("amount", Decimal::from(amount))
                            .with_text("description", "Client dinner"),
                    ),
                Some(mode),
                Utc::now(),
            )
            .expect("expense approval")
    }

    fn project() -> ApprovalRequest {
        ApprovalFactory::default()
            .project(
                "prj-1",
                NewApproval::new(TenantId("acme".to_owned()), PrincipalId("u-req".to_owned())),
                Utc::now(),
            )
            .expect("project approval")
    }

    fn supervisor() -> Principal {
        Principal::new("u-sup", Role::Supervisor)
    }

    fn manager() -> Principal {
        Principal::new("u-mgr", Role::Manager)
    }

    fn pending_count(request: &ApprovalRequest) -> usize {
        request.steps.iter().filter(|step| step.status == StepStatus::Pending).count()
    }

    #[test]
    fn single_step_approval_completes_with_signal() {
        let mut request = expense(500, WorkflowMode::SingleApproval);
        let outcome = apply_decision(&mut request, &supervisor(), &StepDecision::approve(), Utc::now())
            .expect("approve");

        assert_eq!(request.status, ApprovalStatus::Approved);
        assert!(request.completed_at.is_some());
        assert_eq!(request.version, 2);
        assert_eq!(outcome.action, ApprovalAction::Approve);
        assert_eq!(outcome.from, ApprovalStatus::Pending);
        assert_eq!(outcome.to, ApprovalStatus::Approved);
        let signal = outcome.completion.expect("completion signal");
        assert_eq!(signal.subject_type, SubjectType::Expense);
        assert_eq!(signal.subject_id, "exp-1");
        assert_eq!(signal.overall_status, ApprovalStatus::Approved);
    }

    #[test]
    fn approve_then_reject_leaves_third_step_pending() {
        let mut request = expense(8_000, WorkflowMode::MultiLevel);
        assert_eq!(request.steps.len(), 3);

        let first = apply_decision(&mut request, &supervisor(), &StepDecision::approve(), Utc::now())
            .expect("supervisor approves");
        assert_eq!(first.to, ApprovalStatus::Pending);
        assert!(first.completion.is_none());
        assert_eq!(request.current_step().map(|step| step.sequence_number), Some(2));

        apply_decision(&mut request, &manager(), &StepDecision::reject("over budget"), Utc::now())
            .expect("manager rejects");

        assert_eq!(request.status, ApprovalStatus::Rejected);
        assert!(request.completed_at.is_some());
        assert_eq!(request.steps.get(2).and_then(|s| s.comments.as_deref()), Some("over budget"));
        assert_eq!(request.steps.get(3).map(|step| step.status), Some(StepStatus::Pending));
        assert!(request.current_step().is_none());
        assert_eq!(request.version, 3);
    }

    #[test]
    fn completion_requires_every_step() {
        let mut request = project();
        apply_decision(&mut request, &supervisor(), &StepDecision::skip(), Utc::now())
            .expect("skip supervisor");
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert_eq!(pending_count(&request), 1);

        apply_decision(&mut request, &manager(), &StepDecision::approve(), Utc::now())
            .expect("manager approves");
        assert_eq!(request.status, ApprovalStatus::Approved);
        assert_eq!(request.steps.get(1).map(|step| step.status), Some(StepStatus::Skipped));
        assert!(request.steps.iter().all(|step| step.decided_at.is_some()));
    }

    #[test]
    fn accountant_cannot_act_and_state_is_unchanged() {
        let mut request = project();
        let before = request.clone();

        let error = apply_decision(
            &mut request,
            &Principal::new("u-acct", Role::Accountant),
            &StepDecision::approve(),
            Utc::now(),
        )
        .expect_err("forbidden");

        assert!(matches!(error, DomainError::Forbidden(ForbiddenReason::NotYourTurn { .. })));
        assert_eq!(request, before);
    }

    #[test]
    fn reject_requires_a_reason() {
        let mut request = project();
        let before = request.clone();

        for decision in [StepDecision::new(StepAction::Reject), StepDecision::reject("   ")] {
            let error = apply_decision(&mut request, &supervisor(), &decision, Utc::now())
                .expect_err("reason required");
            assert_eq!(error, DomainError::Validation(ValidationFailure::RejectionReasonRequired));
        }
        assert_eq!(request, before);
    }

    #[test]
    fn naming_a_stale_step_is_rejected_before_authorization() {
        let mut request = project();
        let error = apply_decision(
            &mut request,
            &Principal::new("u-acct", Role::Accountant),
            &StepDecision::approve().at_step(2),
            Utc::now(),
        )
        .expect_err("not current");

        assert_eq!(
            error,
            DomainError::InvalidState(InvalidStateReason::NotCurrentStep { requested: 2, current: 1 })
        );
    }

    #[test]
    fn terminal_requests_refuse_further_decisions() {
        let mut request = expense(100, WorkflowMode::SingleApproval);
        apply_decision(&mut request, &supervisor(), &StepDecision::approve(), Utc::now())
            .expect("approve");
        let snapshot = request.clone();

        for decision in [StepDecision::approve(), StepDecision::reject("late"), StepDecision::skip()] {
            let error = apply_decision(&mut request, &supervisor(), &decision, Utc::now())
                .expect_err("already decided");
            assert_eq!(
                error,
                DomainError::InvalidState(InvalidStateReason::AlreadyDecided {
                    status: ApprovalStatus::Approved,
                })
            );
        }
        assert!(cancel(&mut request, &Principal::new("u-req", Role::Employee), Utc::now()).is_err());
        assert_eq!(request, snapshot);
    }

    #[test]
    fn cancel_freezes_remaining_steps() {
        let mut request = project();
        apply_decision(&mut request, &supervisor(), &StepDecision::approve(), Utc::now())
            .expect("approve step 1");

        let outcome = cancel(&mut request, &Principal::new("u-req", Role::Employee), Utc::now())
            .expect("requester cancels");

        assert_eq!(outcome.to, ApprovalStatus::Cancelled);
        assert_eq!(outcome.sequence_number, None);
        assert_eq!(request.steps.get(2).map(|step| step.status), Some(StepStatus::Pending));
        assert!(request.current_step().is_none());

        let error = apply_decision(&mut request, &manager(), &StepDecision::approve(), Utc::now())
            .expect_err("cancelled");
        assert!(matches!(
            error,
            DomainError::InvalidState(InvalidStateReason::AlreadyDecided {
                status: ApprovalStatus::Cancelled
            })
        ));
    }

    #[test]
    fn exactly_one_current_step_while_pending() {
        let mut request = expense(8_000, WorkflowMode::MultiLevel);
        let approvers = [supervisor(), manager(), Principal::new("u-adm", Role::Admin)];

        for (index, approver) in approvers.iter().enumerate() {
            let expected = u32::try_from(index + 1).expect("small index");
            assert_eq!(request.current_step().map(|step| step.sequence_number), Some(expected));
            apply_decision(&mut request, approver, &StepDecision::approve(), Utc::now())
                .expect("approve");
        }
        assert_eq!(request.status, ApprovalStatus::Approved);
        assert_eq!(aggregate_status(&request.steps), ApprovalStatus::Approved);
    }

    #[test]
    fn step_actions_parse_case_insensitively() {
        assert_eq!(StepAction::parse(" Approve "), Some(StepAction::Approve));
        assert_eq!(StepAction::parse("REJECT"), Some(StepAction::Reject));
        assert_eq!(StepAction::parse("escalate"), None);
        assert_eq!(StepAction::Skip.as_str(), "skip");
    }
}
