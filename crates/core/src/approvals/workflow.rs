use chrono::Duration;
use rust_decimal::Decimal;

use crate::config::WorkflowConfig;
use crate::domain::approval::{ApprovalCategory, StepTemplate, WorkflowMode};
use crate::domain::principal::Role;

pub const DEFAULT_SINGLE_STEP_MAX: u64 = 1_000;
pub const DEFAULT_TWO_STEP_MAX: u64 = 5_000;
pub const DEFAULT_STEP_DEADLINE_HOURS: u32 = 72;
/// One year.
pub const MAX_STEP_DEADLINE_HOURS: u32 = 8_760;

/// Step-generation policy. Thresholds are inclusive upper bounds: an amount
/// equal to a threshold lands in the cheaper workflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowPolicy {
    pub single_step_max: Decimal,
    pub two_step_max: Decimal,
    pub step_deadline: Option<Duration>,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            single_step_max: Decimal::from(DEFAULT_SINGLE_STEP_MAX),
            two_step_max: Decimal::from(DEFAULT_TWO_STEP_MAX),
            step_deadline: Some(Duration::hours(i64::from(DEFAULT_STEP_DEADLINE_HOURS))),
        }
    }
}

impl WorkflowPolicy {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        Self {
            single_step_max: Decimal::from(config.single_step_max),
            two_step_max: Decimal::from(config.two_step_max),
            step_deadline: (config.step_deadline_hours > 0)
                .then(|| Duration::hours(i64::from(config.step_deadline_hours))),
        }
    }

    pub fn select_steps(
        &self,
        category: ApprovalCategory,
        amount: Decimal,
        mode: WorkflowMode,
    ) -> Vec<StepTemplate> {
        self.select_roles(category, amount, mode)
            .into_iter()
            .map(|role| StepTemplate {
                approver_role: role,
                approver_principal: None,
                deadline_after: self.step_deadline,
            })
            .collect()
    }

    fn select_roles(
        &self,
        category: ApprovalCategory,
        amount: Decimal,
        mode: WorkflowMode,
    ) -> Vec<Role> {
        use ApprovalCategory::{Budget, Expense, Project};
        use Role::{Admin, DepartmentHead, FinanceTeam, Manager, Supervisor};

        match (mode, category) {
            (WorkflowMode::SingleApproval, _) => vec![Supervisor],
            (WorkflowMode::MultiLevel, Expense) => {
                if amount <= self.single_step_max {
                    vec![Supervisor]
                } else if amount <= self.two_step_max {
                    vec![Supervisor, Manager]
                } else {
                    vec![Supervisor, Manager, Admin]
                }
            }
            (_, Project) => vec![Supervisor, Manager],
            (_, Budget) => vec![Manager, Admin],
            (WorkflowMode::DepartmentHead, _) => vec![DepartmentHead],
            (WorkflowMode::FinanceTeam, _) => vec![FinanceTeam],
            (WorkflowMode::Management, _) => vec![Manager, Admin],
            (WorkflowMode::MultiLevel, _) => vec![Supervisor, Manager],
        }
    }
}

/// Selects steps with the default policy.
pub fn select_steps(
    category: ApprovalCategory,
    amount: Decimal,
    mode: WorkflowMode,
) -> Vec<StepTemplate> {
    WorkflowPolicy::default().select_steps(category, amount, mode)
}
