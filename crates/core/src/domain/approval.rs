use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::principal::{PrincipalId, Role};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(format!("apr_{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalCategory {
    Expense,
    Project,
    Budget,
    UserInvitation,
    DepartmentChange,
    CompanySettings,
}

impl ApprovalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Project => "project",
            Self::Budget => "budget",
            Self::UserInvitation => "user_invitation",
            Self::DepartmentChange => "department_change",
            Self::CompanySettings => "company_settings",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "expense" => Some(Self::Expense),
            "project" => Some(Self::Project),
            "budget" => Some(Self::Budget),
            "user_invitation" => Some(Self::UserInvitation),
            "department_change" => Some(Self::DepartmentChange),
            "company_settings" => Some(Self::CompanySettings),
            _ => None,
        }
    }

    pub fn requires_amount(&self) -> bool {
        matches!(self, Self::Expense | Self::Budget)
    }
}

impl fmt::Display for ApprovalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Expense,
    Revenue,
    Project,
    Department,
    Employee,
    Company,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Revenue => "revenue",
            Self::Project => "project",
            Self::Department => "department",
            Self::Employee => "employee",
            Self::Company => "company",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "expense" => Some(Self::Expense),
            "revenue" => Some(Self::Revenue),
            "project" => Some(Self::Project),
            "department" => Some(Self::Department),
            "employee" => Some(Self::Employee),
            "company" => Some(Self::Company),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    SingleApproval,
    MultiLevel,
    DepartmentHead,
    FinanceTeam,
    Management,
}

impl WorkflowMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleApproval => "single_approval",
            Self::MultiLevel => "multi_level",
            Self::DepartmentHead => "department_head",
            Self::FinanceTeam => "finance_team",
            Self::Management => "management",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single_approval" => Some(Self::SingleApproval),
            "multi_level" => Some(Self::MultiLevel),
            "department_head" => Some(Self::DepartmentHead),
            "finance_team" => Some(Self::FinanceTeam),
            "management" => Some(Self::Management),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }

    /// Approved and skipped both count toward completion.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Approved | Self::Skipped)
    }
}

/// A primitive captured from the subject entity at request time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SnapshotValue {
    Text(String),
    Decimal(Decimal),
    Integer(i64),
    Bool(bool),
}

impl fmt::Display for SnapshotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Decimal(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectSnapshot(BTreeMap<String, SnapshotValue>);

impl SubjectSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), SnapshotValue::Text(value.into()));
        self
    }

    pub fn with_decimal(mut self, key: impl Into<String>, value: Decimal) -> Self {
        self.0.insert(key.into(), SnapshotValue::Decimal(value));
        self
    }

    pub fn with_integer(mut self, key: impl Into<String>, value: i64) -> Self {
        self.0.insert(key.into(), SnapshotValue::Integer(value));
        self
    }

    pub fn with_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.0.insert(key.into(), SnapshotValue::Bool(value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&SnapshotValue> {
        self.0.get(key)
    }

    /// Non-blank text value for `key`.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(SnapshotValue::Text(value)) if !value.trim().is_empty() => Some(value.trim()),
            _ => None,
        }
    }

    /// Numeric value for `key`; integers widen to decimals and numeric text is parsed.
    pub fn decimal(&self, key: &str) -> Option<Decimal> {
        match self.0.get(key)? {
            SnapshotValue::Decimal(value) => Some(*value),
            SnapshotValue::Integer(value) => Some(Decimal::from(*value)),
            SnapshotValue::Text(value) => value.trim().parse::<Decimal>().ok(),
            SnapshotValue::Bool(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SnapshotValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, SnapshotValue)> for SubjectSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, SnapshotValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Typed envelope around the external entity an approval gates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub snapshot: SubjectSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub sequence_number: u32,
    pub approver_role: Role,
    pub approver_principal: Option<PrincipalId>,
    pub status: StepStatus,
    pub comments: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Blueprint for one step, produced by the workflow selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepTemplate {
    pub approver_role: Role,
    pub approver_principal: Option<PrincipalId>,
    pub deadline_after: Option<chrono::Duration>,
}

impl StepTemplate {
    pub fn for_role(approver_role: Role) -> Self {
        Self { approver_role, approver_principal: None, deadline_after: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StepArenaError {
    #[error("an approval needs at least one step")]
    Empty,
    #[error("step at position {position} has sequence number {found}, expected {expected}")]
    NonContiguous { position: usize, expected: u32, found: u32 },
    #[error("deadline for step {sequence_number} is out of the representable date range")]
    DeadlineOutOfRange { sequence_number: u32 },
}

/// Steps of one request, indexed by sequence number (`sequence_number == index + 1`).
///
/// Order is fixed at construction. Decisions are recorded only through the
/// crate-private [`ApprovalSteps::record_decision`], which the transition
/// functions in `approvals::transition` call after checking every rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ApprovalStep>", into = "Vec<ApprovalStep>")]
pub struct ApprovalSteps(Vec<ApprovalStep>);

impl ApprovalSteps {
    pub fn from_templates(
        templates: Vec<StepTemplate>,
        now: DateTime<Utc>,
    ) -> Result<Self, StepArenaError> {
        let steps = templates
            .into_iter()
            .zip(1u32..)
            .map(|(template, sequence_number)| -> Result<ApprovalStep, StepArenaError> {
                let deadline = match template.deadline_after {
                    Some(after) => Some(
                        now.checked_add_signed(after)
                            .ok_or(StepArenaError::DeadlineOutOfRange { sequence_number })?,
                    ),
                    None => None,
                };
                Ok(ApprovalStep {
                    sequence_number,
                    approver_role: template.approver_role,
                    approver_principal: template.approver_principal,
                    status: StepStatus::Pending,
                    comments: None,
                    decided_at: None,
                    deadline,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::try_from(steps)
    }

    pub fn get(&self, sequence_number: u32) -> Option<&ApprovalStep> {
        let index = usize::try_from(sequence_number.checked_sub(1)?).ok()?;
        self.0.get(index)
    }

    /// The lowest-numbered step still pending.
    pub fn current(&self) -> Option<&ApprovalStep> {
        self.0.iter().find(|step| step.status == StepStatus::Pending)
    }

    pub fn all_resolved(&self) -> bool {
        self.0.iter().all(|step| step.status.is_resolved())
    }

    pub fn any_rejected(&self) -> bool {
        self.0.iter().any(|step| step.status == StepStatus::Rejected)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ApprovalStep> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ApprovalStep] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn record_decision(
        &mut self,
        sequence_number: u32,
        status: StepStatus,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<&ApprovalStep> {
        let index = usize::try_from(sequence_number.checked_sub(1)?).ok()?;
        let step = self.0.get_mut(index)?;
        if step.status != StepStatus::Pending {
            return None;
        }
        step.status = status;
        step.comments = comments;
        step.decided_at = Some(now);
        Some(step)
    }
}

impl TryFrom<Vec<ApprovalStep>> for ApprovalSteps {
    type Error = StepArenaError;

    fn try_from(steps: Vec<ApprovalStep>) -> Result<Self, Self::Error> {
        if steps.is_empty() {
            return Err(StepArenaError::Empty);
        }
        for (position, (step, expected)) in steps.iter().zip(1u32..).enumerate() {
            if step.sequence_number != expected {
                return Err(StepArenaError::NonContiguous {
                    position,
                    expected,
                    found: step.sequence_number,
                });
            }
        }
        Ok(Self(steps))
    }
}

impl From<ApprovalSteps> for Vec<ApprovalStep> {
    fn from(steps: ApprovalSteps) -> Self {
        steps.0
    }
}

impl<'a> IntoIterator for &'a ApprovalSteps {
    type Item = &'a ApprovalStep;
    type IntoIter = std::slice::Iter<'a, ApprovalStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub category: ApprovalCategory,
    pub status: ApprovalStatus,
    pub priority: Priority,
    pub subject: SubjectRef,
    pub tenant_id: TenantId,
    pub requested_by: PrincipalId,
    pub request_reason: String,
    pub workflow_mode: WorkflowMode,
    pub steps: ApprovalSteps,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    /// The only step eligible for action, if the request is still open.
    pub fn current_step(&self) -> Option<&ApprovalStep> {
        if self.status.is_terminal() {
            return None;
        }
        self.steps.current()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn completion_signal(&self) -> Option<CompletionSignal> {
        self.is_terminal().then(|| CompletionSignal {
            request_id: self.id.clone(),
            subject_type: self.subject.subject_type,
            subject_id: self.subject.subject_id.clone(),
            overall_status: self.status,
        })
    }

    /// True when the current step carries a deadline earlier than `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.current_step()
            .and_then(|step| step.deadline)
            .map(|deadline| deadline < now)
            .unwrap_or(false)
    }
}

/// Handed to the originating subsystem once a request reaches a terminal status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub request_id: ApprovalId,
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub overall_status: ApprovalStatus,
}
