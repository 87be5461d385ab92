use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use fintrack_core::approvals::authorization::can_act;
use fintrack_core::approvals::completion::{CompletionListener, NoopCompletionListener};
use fintrack_core::approvals::factory::{
    ensure_no_pending_duplicate, ApprovalFactory, DepartmentRef, NewApproval,
};
use fintrack_core::approvals::transition::{
    apply_decision, cancel, ApprovalAction, StepDecision, TransitionOutcome,
};
use fintrack_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, NoopAuditSink};
use fintrack_core::domain::approval::{
    ApprovalId, ApprovalRequest, SubjectType, TenantId, WorkflowMode,
};
use fintrack_core::domain::principal::{Principal, PrincipalId};
use fintrack_core::domain::query::{ApprovalFilter, ApprovalStatistics, Page, PageResult};
use fintrack_core::errors::{ApplicationError, DomainError, InvalidStateReason};
use fintrack_db::repositories::{ApprovalRepository, RepositoryError};

/// Entry point for every approval operation.
///
/// Each mutation is one read-modify-write: load, apply the pure transition,
/// then persist with a compare-and-swap on the version that was read. The
/// loser of a race gets `InvalidState(ConcurrentModification)`.
#[derive(Clone)]
pub struct ApprovalService {
    repository: Arc<dyn ApprovalRepository>,
    factory: ApprovalFactory,
    audit: Arc<dyn AuditSink>,
    listener: Arc<dyn CompletionListener>,
}

impl ApprovalService {
    pub fn new(repository: Arc<dyn ApprovalRepository>, factory: ApprovalFactory) -> Self {
        Self {
            repository,
            factory,
            audit: Arc::new(NoopAuditSink),
            listener: Arc::new(NoopCompletionListener),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_completion_listener(mut self, listener: Arc<dyn CompletionListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn factory(&self) -> &ApprovalFactory {
        &self.factory
    }

    pub async fn create_expense(
        &self,
        expense_id: &str,
        draft: NewApproval,
        mode: Option<WorkflowMode>,
    ) -> Result<ApprovalRequest, ApplicationError> {
        self.create(SubjectType::Expense, expense_id, draft, |factory, draft, now| {
            factory.expense(expense_id, draft, mode, now)
        })
        .await
    }

    pub async fn create_project(
        &self,
        project_id: &str,
        draft: NewApproval,
    ) -> Result<ApprovalRequest, ApplicationError> {
        self.create(SubjectType::Project, project_id, draft, |factory, draft, now| {
            factory.project(project_id, draft, now)
        })
        .await
    }

    pub async fn create_budget(
        &self,
        department: DepartmentRef,
        draft: NewApproval,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let department_id = department.id.clone();
        self.create(SubjectType::Department, &department_id, draft, |factory, draft, now| {
            factory.budget(department, draft, now)
        })
        .await
    }

    pub async fn approve(
        &self,
        id: &ApprovalId,
        principal: &Principal,
        comments: Option<String>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let mut decision = StepDecision::approve();
        decision.comments = comments;
        self.decide(id, principal, decision).await
    }

    pub async fn reject(
        &self,
        id: &ApprovalId,
        principal: &Principal,
        reason: impl Into<String>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        self.decide(id, principal, StepDecision::reject(reason)).await
    }

    pub async fn skip(
        &self,
        id: &ApprovalId,
        principal: &Principal,
        comments: Option<String>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let mut decision = StepDecision::skip();
        decision.comments = comments;
        self.decide(id, principal, decision).await
    }

    pub async fn decide(
        &self,
        id: &ApprovalId,
        principal: &Principal,
        decision: StepDecision,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let action = ApprovalAction::from(decision.action);
        self.mutate(id, principal, action, |approval, now| {
            apply_decision(approval, principal, &decision, now)
        })
        .await
    }

    pub async fn cancel(
        &self,
        id: &ApprovalId,
        principal: &Principal,
    ) -> Result<TransitionOutcome, ApplicationError> {
        self.mutate(id, principal, ApprovalAction::Cancel, |approval, now| {
            cancel(approval, principal, now)
        })
        .await
    }

    pub async fn get_by_id(&self, id: &ApprovalId) -> Result<ApprovalRequest, ApplicationError> {
        self.repository
            .find_by_id(id)
            .await
            .map_err(repository_failure)?
            .ok_or_else(|| ApplicationError::NotFound(id.clone()))
    }

    /// Pending requests whose current step `principal` may decide, oldest first.
    pub async fn list_pending_for_principal(
        &self,
        tenant_id: &TenantId,
        principal: &Principal,
    ) -> Result<Vec<ApprovalRequest>, ApplicationError> {
        let pending = self.repository.list_pending(tenant_id).await.map_err(repository_failure)?;
        Ok(pending.into_iter().filter(|approval| can_act(principal, approval)).collect())
    }

    pub async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        filter: &ApprovalFilter,
        page: Page,
    ) -> Result<PageResult<ApprovalRequest>, ApplicationError> {
        self.repository.list(tenant_id, filter, page.clamped()).await.map_err(repository_failure)
    }

    pub async fn list_for_requester(
        &self,
        tenant_id: &TenantId,
        requested_by: &PrincipalId,
        page: Page,
    ) -> Result<PageResult<ApprovalRequest>, ApplicationError> {
        let filter =
            ApprovalFilter { requested_by: Some(requested_by.clone()), ..ApprovalFilter::default() };
        self.list_for_tenant(tenant_id, &filter, page).await
    }

    pub async fn statistics(
        &self,
        tenant_id: &TenantId,
    ) -> Result<ApprovalStatistics, ApplicationError> {
        self.repository.statistics(tenant_id).await.map_err(repository_failure)
    }

    /// Pending requests whose current step deadline has passed. Nothing is transitioned.
    pub async fn list_overdue(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, ApplicationError> {
        let pending = self.repository.list_pending(tenant_id).await.map_err(repository_failure)?;
        Ok(pending.into_iter().filter(|approval| approval.is_overdue(now)).collect())
    }

    async fn create<F>(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        draft: NewApproval,
        build: F,
    ) -> Result<ApprovalRequest, ApplicationError>
    where
        F: FnOnce(&ApprovalFactory, NewApproval, DateTime<Utc>) -> Result<ApprovalRequest, DomainError>,
    {
        let correlation_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(
            None,
            Some(draft.tenant_id.clone()),
            correlation_id.clone(),
            draft.requested_by.0.clone(),
        );

        let existing = self
            .repository
            .find_pending_for_subject(&draft.tenant_id, subject_type, subject_id)
            .await
            .map_err(repository_failure)?;
        let approval = ensure_no_pending_duplicate(subject_type, subject_id, existing.as_ref())
            .and_then(|()| build(&self.factory, draft, Utc::now()));

        let approval = match approval {
            Ok(approval) => approval,
            Err(error) => {
                warn!(
                    event_name = "approval.create.rejected",
                    correlation_id = %correlation_id,
                    subject_type = subject_type.as_str(),
                    subject_id,
                    error = %error,
                    "approval creation rejected"
                );
                self.audit.emit(
                    audit
                        .event("approval.create", AuditCategory::Creation, AuditOutcome::Rejected)
                        .with_metadata("subject_type", subject_type.as_str())
                        .with_metadata("subject_id", subject_id)
                        .with_metadata("error", error.to_string()),
                );
                return Err(error.into());
            }
        };

        if let Err(error) = self.repository.insert(&approval).await {
            self.audit.emit(
                audit
                    .event("approval.create", AuditCategory::Persistence, AuditOutcome::Failed)
                    .with_metadata("error", error.to_string()),
            );
            return Err(repository_failure(error));
        }

        info!(
            event_name = "approval.create.applied",
            correlation_id = %correlation_id,
            approval_id = %approval.id,
            tenant_id = %approval.tenant_id,
            category = approval.category.as_str(),
            steps = approval.steps.len(),
            "approval request created"
        );
        self.audit.emit(
            AuditContext { approval_id: Some(approval.id.clone()), ..audit }
                .event("approval.create", AuditCategory::Creation, AuditOutcome::Success)
                .with_metadata("category", approval.category.as_str())
                .with_metadata("workflow_mode", approval.workflow_mode.as_str())
                .with_metadata("steps", approval.steps.len().to_string()),
        );

        Ok(approval)
    }

    async fn mutate<F>(
        &self,
        id: &ApprovalId,
        principal: &Principal,
        action: ApprovalAction,
        transition: F,
    ) -> Result<TransitionOutcome, ApplicationError>
    where
        F: FnOnce(&mut ApprovalRequest, DateTime<Utc>) -> Result<TransitionOutcome, DomainError>,
    {
        let correlation_id = Uuid::new_v4().to_string();
        let mut approval = self.get_by_id(id).await?;
        let expected_version = approval.version;
        let audit = AuditContext::new(
            Some(approval.id.clone()),
            Some(approval.tenant_id.clone()),
            correlation_id.clone(),
            principal.id.0.clone(),
        );
        let category = match action {
            ApprovalAction::Cancel => AuditCategory::Cancellation,
            _ => AuditCategory::Decision,
        };
        let event_type = format!("approval.{}", action.as_str());

        let outcome = match transition(&mut approval, Utc::now()) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "approval.transition.rejected",
                    correlation_id = %correlation_id,
                    approval_id = %id,
                    principal = %principal.id,
                    action = action.as_str(),
                    error = %error,
                    "approval transition rejected"
                );
                self.audit.emit(
                    audit
                        .event(event_type, category, AuditOutcome::Rejected)
                        .with_metadata("role", principal.role.as_str())
                        .with_metadata("error", error.to_string()),
                );
                return Err(error.into());
            }
        };

        if let Err(error) = self.repository.update(&approval, expected_version).await {
            let error = repository_failure(error);
            warn!(
                event_name = "approval.transition.persist_failed",
                correlation_id = %correlation_id,
                approval_id = %id,
                expected_version,
                error = %error,
                "approval transition could not be persisted"
            );
            self.audit.emit(
                audit
                    .event(event_type, AuditCategory::Persistence, AuditOutcome::Failed)
                    .with_metadata("expected_version", expected_version.to_string())
                    .with_metadata("error", error.to_string()),
            );
            return Err(error);
        }

        info!(
            event_name = "approval.transition.applied",
            correlation_id = %correlation_id,
            approval_id = %approval.id,
            tenant_id = %approval.tenant_id,
            action = action.as_str(),
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            version = approval.version,
            "approval transition applied"
        );
        let mut event = audit
            .event(event_type, category, AuditOutcome::Success)
            .with_metadata("from", outcome.from.as_str())
            .with_metadata("to", outcome.to.as_str());
        if let Some(sequence_number) = outcome.sequence_number {
            event = event.with_metadata("step", sequence_number.to_string());
        }
        self.audit.emit(event);

        if let Some(signal) = &outcome.completion {
            self.listener.on_completed(signal);
        }

        Ok(outcome)
    }
}

fn repository_failure(error: RepositoryError) -> ApplicationError {
    match error {
        RepositoryError::VersionConflict { expected, .. } => {
            DomainError::from(InvalidStateReason::ConcurrentModification {
                expected_version: expected,
            })
            .into()
        }
        RepositoryError::NotFound(id) => ApplicationError::NotFound(id),
        other => ApplicationError::Storage(other.to_string()),
    }
}
