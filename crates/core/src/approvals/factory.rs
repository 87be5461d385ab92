use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::approvals::workflow::WorkflowPolicy;
use crate::config::WorkflowConfig;
use crate::domain::approval::{
    ApprovalCategory, ApprovalId, ApprovalRequest, ApprovalStatus, ApprovalSteps, Priority,
    StepTemplate, SubjectRef, SubjectSnapshot, SubjectType, TenantId, WorkflowMode,
};
use crate::domain::principal::{PrincipalId, Role};
use crate::errors::{DomainError, ValidationFailure};

pub const DEFAULT_MAX_REASON_LEN: usize = 1_000;
pub const DEFAULT_CURRENCY: &str = "USD";

const AMOUNT_FIELD: &str = "amount";
const TOTAL_BUDGET_FIELD: &str = "total_budget";
const CURRENCY_FIELD: &str = "currency";
const DESCRIPTION_FIELD: &str = "description";
const NAME_FIELD: &str = "name";

/// Caller-supplied part of every approval: who asks, for which tenant, and the
/// immutable snapshot of the subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewApproval {
    pub tenant_id: TenantId,
    pub requested_by: PrincipalId,
    pub snapshot: SubjectSnapshot,
    pub priority: Priority,
    pub request_reason: Option<String>,
}

impl NewApproval {
    pub fn new(tenant_id: TenantId, requested_by: PrincipalId) -> Self {
        Self {
            tenant_id,
            requested_by,
            snapshot: SubjectSnapshot::default(),
            priority: Priority::default(),
            request_reason: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: SubjectSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.request_reason = Some(reason.into());
        self
    }
}

/// Department whose budget is changing. A named manager is bound to the
/// manager step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepartmentRef {
    pub id: String,
    pub manager: Option<PrincipalId>,
}

impl DepartmentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), manager: None }
    }

    pub fn with_manager(mut self, manager: PrincipalId) -> Self {
        self.manager = Some(manager);
        self
    }
}

#[derive(Clone, Debug)]
pub struct ApprovalFactory {
    policy: WorkflowPolicy,
    max_reason_len: usize,
    default_currency: String,
}

impl Default for ApprovalFactory {
    fn default() -> Self {
        Self {
            policy: WorkflowPolicy::default(),
            max_reason_len: DEFAULT_MAX_REASON_LEN,
            default_currency: DEFAULT_CURRENCY.to_owned(),
        }
    }
}

struct Blueprint {
    category: ApprovalCategory,
    mode: WorkflowMode,
    subject: SubjectRef,
    amount: Decimal,
    reason: String,
    templates: Vec<StepTemplate>,
}

impl ApprovalFactory {
    pub fn new(
        policy: WorkflowPolicy,
        max_reason_len: usize,
        default_currency: impl Into<String>,
    ) -> Self {
        Self { policy, max_reason_len, default_currency: default_currency.into() }
    }

    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self::new(
            WorkflowPolicy::from_config(config),
            config.max_reason_len,
            config.default_currency.clone(),
        )
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// Expense approvals default to a single supervisor step.
    pub fn expense(
        &self,
        expense_id: impl Into<String>,
        draft: NewApproval,
        mode: Option<WorkflowMode>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, DomainError> {
        let mode = mode.unwrap_or(WorkflowMode::SingleApproval);
        let amount = draft
            .snapshot
            .decimal(AMOUNT_FIELD)
            .ok_or(ValidationFailure::MissingAmount { category: ApprovalCategory::Expense })?;
        let reason = explicit_reason(&draft)
            .or_else(|| draft.snapshot.text(DESCRIPTION_FIELD).map(str::to_owned))
            .unwrap_or_else(|| "Expense approval request".to_owned());
        let templates = self.policy.select_steps(ApprovalCategory::Expense, amount, mode);

        self.assemble(
            Blueprint {
                category: ApprovalCategory::Expense,
                mode,
                subject: subject(SubjectType::Expense, expense_id, &draft),
                amount,
                reason,
                templates,
            },
            draft,
            now,
        )
    }

    /// Project approvals always run supervisor then manager.
    pub fn project(
        &self,
        project_id: impl Into<String>,
        draft: NewApproval,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, DomainError> {
        let mode = WorkflowMode::MultiLevel;
        let amount = draft.snapshot.decimal(TOTAL_BUDGET_FIELD).unwrap_or(Decimal::ZERO);
        let reason = explicit_reason(&draft)
            .or_else(|| {
                draft
                    .snapshot
                    .text(NAME_FIELD)
                    .map(|name| format!("Approval requested for project {name}"))
            })
            .unwrap_or_else(|| "Project approval request".to_owned());
        let templates = self.policy.select_steps(ApprovalCategory::Project, amount, mode);

        self.assemble(
            Blueprint {
                category: ApprovalCategory::Project,
                mode,
                subject: subject(SubjectType::Project, project_id, &draft),
                amount,
                reason,
                templates,
            },
            draft,
            now,
        )
    }

    /// Budget approvals run manager then admin against the department.
    pub fn budget(
        &self,
        department: DepartmentRef,
        draft: NewApproval,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, DomainError> {
        let mode = WorkflowMode::MultiLevel;
        let amount = draft
            .snapshot
            .decimal(TOTAL_BUDGET_FIELD)
            .ok_or(ValidationFailure::MissingAmount { category: ApprovalCategory::Budget })?;
        let reason = explicit_reason(&draft)
            .or_else(|| draft.snapshot.text(DESCRIPTION_FIELD).map(str::to_owned))
            .unwrap_or_else(|| "Budget change approval request".to_owned());

        let mut templates = self.policy.select_steps(ApprovalCategory::Budget, amount, mode);
        if let Some(manager) = &department.manager {
            for template in templates.iter_mut().filter(|t| t.approver_role == Role::Manager) {
                template.approver_principal = Some(manager.clone());
            }
        }

        self.assemble(
            Blueprint {
                category: ApprovalCategory::Budget,
                mode,
                subject: subject(SubjectType::Department, department.id, &draft),
                amount,
                reason,
                templates,
            },
            draft,
            now,
        )
    }

    fn assemble(
        &self,
        blueprint: Blueprint,
        draft: NewApproval,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, DomainError> {
        if blueprint.amount.is_sign_negative() && !blueprint.amount.is_zero() {
            return Err(ValidationFailure::NegativeAmount.into());
        }

        let reason = blueprint.reason.trim().to_owned();
        if reason.is_empty() {
            return Err(ValidationFailure::MissingRequestReason.into());
        }
        let length = reason.chars().count();
        if length > self.max_reason_len {
            return Err(
                ValidationFailure::RequestReasonTooLong { length, max: self.max_reason_len }.into()
            );
        }

        let steps = ApprovalSteps::from_templates(blueprint.templates, now)
            .map_err(ValidationFailure::from)?;
        let currency = draft
            .snapshot
            .text(CURRENCY_FIELD)
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| self.default_currency.clone());

        Ok(ApprovalRequest {
            id: ApprovalId::generate(),
            category: blueprint.category,
            status: ApprovalStatus::Pending,
            priority: draft.priority,
            subject: blueprint.subject,
            tenant_id: draft.tenant_id,
            requested_by: draft.requested_by,
            request_reason: reason,
            workflow_mode: blueprint.mode,
            steps,
            amount: Some(blueprint.amount),
            currency: Some(currency),
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }
}

/// Fails when `pending` already holds an open request for the same subject.
pub fn ensure_no_pending_duplicate(
    subject_type: SubjectType,
    subject_id: &str,
    pending: Option<&ApprovalRequest>,
) -> Result<(), DomainError> {
    match pending {
        Some(existing) if existing.status == ApprovalStatus::Pending => {
            Err(DomainError::DuplicateApproval {
                subject_type,
                subject_id: subject_id.to_owned(),
                existing: existing.id.clone(),
            })
        }
        _ => Ok(()),
    }
}

fn explicit_reason(draft: &NewApproval) -> Option<String> {
    draft
        .request_reason
        .as_deref()
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_owned)
}

fn subject(subject_type: SubjectType, id: impl Into<String>, draft: &NewApproval) -> SubjectRef {
    SubjectRef { subject_type, subject_id: id.into(), snapshot: draft.snapshot.clone() }
}
