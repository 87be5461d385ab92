use chrono::Utc;
use clap::{Args, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use fintrack_core::approvals::factory::{DepartmentRef, NewApproval};
use fintrack_core::approvals::transition::{StepAction, StepDecision};
use fintrack_core::config::AppConfig;
use fintrack_core::domain::approval::{
    ApprovalCategory, ApprovalId, ApprovalStatus, Priority, SubjectSnapshot, TenantId,
    WorkflowMode,
};
use fintrack_core::domain::principal::{Principal, PrincipalId, Role};
use fintrack_core::domain::query::{ApprovalFilter, Page};
use fintrack_core::errors::{ApplicationError, InterfaceError};
use fintrack_engine::{bootstrap_with_config, ApprovalService};

use crate::commands::{runtime, CommandResult};

#[derive(Debug, Subcommand)]
pub enum ApprovalCommand {
    #[command(about = "Open an approval request for an expense, project, or department budget")]
    Submit(SubmitArgs),
    #[command(about = "Approve, reject, or skip the current step of a request")]
    Decide(DecideArgs),
    #[command(about = "Cancel an open request as its requester or an admin/manager")]
    Cancel {
        id: String,
        #[command(flatten)]
        principal: PrincipalArgs,
    },
    #[command(about = "Show one request with its steps")]
    Show { id: String },
    #[command(about = "List open requests the principal may act on, oldest first")]
    Pending {
        #[arg(long)]
        tenant: String,
        #[command(flatten)]
        principal: PrincipalArgs,
    },
    #[command(about = "List a tenant's requests, newest first")]
    List(ListArgs),
    #[command(about = "Count a tenant's requests by status")]
    Stats {
        #[arg(long)]
        tenant: String,
    },
    #[command(about = "List open requests whose current step is past its deadline")]
    Overdue {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Debug, Args)]
pub struct PrincipalArgs {
    #[arg(long = "principal", help = "Acting principal id")]
    pub principal_id: String,
    #[arg(long, value_parser = parse_role, help = "Acting principal role")]
    pub role: Role,
}

impl PrincipalArgs {
    fn principal(&self) -> Principal {
        Principal::new(self.principal_id.clone(), self.role)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SubjectKind {
    Expense,
    Project,
    Budget,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    #[arg(value_enum)]
    pub kind: SubjectKind,
    #[arg(help = "Expense, project, or department id")]
    pub subject_id: String,
    #[arg(long)]
    pub tenant: String,
    #[arg(long)]
    pub requested_by: String,
    #[arg(long, value_parser = parse_amount, help = "Expense amount or project/budget total")]
    pub amount: Option<Decimal>,
    #[arg(long)]
    pub currency: Option<String>,
    #[arg(long, help = "Project name used in the default reason")]
    pub name: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub reason: Option<String>,
    #[arg(long, value_parser = parse_priority)]
    pub priority: Option<Priority>,
    #[arg(long, value_parser = parse_mode, help = "Expense workflow mode")]
    pub mode: Option<WorkflowMode>,
    #[arg(long, help = "Department manager bound to budget manager steps")]
    pub manager: Option<String>,
}

#[derive(Debug, Args)]
pub struct DecideArgs {
    pub id: String,
    #[arg(long, value_parser = parse_action)]
    pub action: StepAction,
    #[command(flatten)]
    pub principal: PrincipalArgs,
    #[arg(long, help = "Required when rejecting")]
    pub comments: Option<String>,
    #[arg(long, help = "Step the decision was made against")]
    pub step: Option<u32>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub tenant: String,
    #[arg(long, value_parser = parse_status)]
    pub status: Option<ApprovalStatus>,
    #[arg(long, value_parser = parse_category)]
    pub category: Option<ApprovalCategory>,
    #[arg(long)]
    pub requested_by: Option<String>,
    #[arg(long, default_value_t = 50)]
    pub limit: u32,
    #[arg(long, default_value_t = 0)]
    pub offset: u32,
}

impl ApprovalCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Submit(_) => "approvals.submit",
            Self::Decide(_) => "approvals.decide",
            Self::Cancel { .. } => "approvals.cancel",
            Self::Show { .. } => "approvals.show",
            Self::Pending { .. } => "approvals.pending",
            Self::List(_) => "approvals.list",
            Self::Stats { .. } => "approvals.stats",
            Self::Overdue { .. } => "approvals.overdue",
        }
    }
}

pub fn run(config: AppConfig, command: ApprovalCommand) -> CommandResult {
    let name = command.name();
    let runtime = match runtime(name) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let app = match bootstrap_with_config(config).await {
            Ok(app) => app,
            Err(error) => return CommandResult::failure(name, "bootstrap", error.to_string(), 4),
        };

        let result = dispatch(&app.approvals, command).await;
        app.db_pool.close().await;

        match result {
            Ok((message, data)) => CommandResult::success_with_data(name, message, data),
            Err(error) => {
                let interface = error.into_interface(Uuid::new_v4().to_string());
                let (error_class, exit_code) = classify(&interface);
                CommandResult::failure(
                    name,
                    error_class,
                    format!("{interface} (correlation_id: {})", interface.correlation_id()),
                    exit_code,
                )
            }
        }
    })
}

async fn dispatch(
    service: &ApprovalService,
    command: ApprovalCommand,
) -> Result<(String, Value), ApplicationError> {
    match command {
        ApprovalCommand::Submit(args) => submit(service, args).await,
        ApprovalCommand::Decide(args) => {
            let id = ApprovalId(args.id);
            let mut decision = StepDecision::new(args.action);
            decision.comments = args.comments;
            if let Some(step) = args.step {
                decision = decision.at_step(step);
            }
            let outcome = service.decide(&id, &args.principal.principal(), decision).await?;
            let message =
                format!("{} `{id}`: {} -> {}", outcome.action.as_str(), outcome.from, outcome.to);
            Ok((message, to_value(&outcome)))
        }
        ApprovalCommand::Cancel { id, principal } => {
            let id = ApprovalId(id);
            let outcome = service.cancel(&id, &principal.principal()).await?;
            Ok((format!("cancelled `{id}`"), to_value(&outcome)))
        }
        ApprovalCommand::Show { id } => {
            let approval = service.get_by_id(&ApprovalId(id)).await?;
            Ok((format!("approval `{}` is {}", approval.id, approval.status), to_value(&approval)))
        }
        ApprovalCommand::Pending { tenant, principal } => {
            let pending = service
                .list_pending_for_principal(&TenantId(tenant), &principal.principal())
                .await?;
            let message =
                format!("{} request(s) awaiting `{}`", pending.len(), principal.principal_id);
            Ok((message, to_value(&pending)))
        }
        ApprovalCommand::List(args) => {
            let filter = ApprovalFilter {
                status: args.status,
                category: args.category,
                subject_type: None,
                requested_by: args.requested_by.map(PrincipalId),
            };
            let page = service
                .list_for_tenant(&TenantId(args.tenant), &filter, Page::new(args.limit, args.offset))
                .await?;
            Ok((format!("{} of {} request(s)", page.items.len(), page.total), to_value(&page)))
        }
        ApprovalCommand::Stats { tenant } => {
            let statistics = service.statistics(&TenantId(tenant)).await?;
            let message =
                format!("{} request(s), {} pending", statistics.total, statistics.pending);
            Ok((message, to_value(&statistics)))
        }
        ApprovalCommand::Overdue { tenant } => {
            let overdue = service.list_overdue(&TenantId(tenant), Utc::now()).await?;
            Ok((format!("{} overdue request(s)", overdue.len()), to_value(&overdue)))
        }
    }
}

async fn submit(
    service: &ApprovalService,
    args: SubmitArgs,
) -> Result<(String, Value), ApplicationError> {
    let mut snapshot = SubjectSnapshot::new();
    let amount_key = match args.kind {
        SubjectKind::Expense => "amount",
        SubjectKind::Project | SubjectKind::Budget => "total_budget",
    };
    if let Some(amount) = args.amount {
        snapshot = snapshot.with_decimal(amount_key, amount);
    }
    if let Some(currency) = args.currency {
        snapshot = snapshot.with_text("currency", currency);
    }
    if let Some(name) = args.name {
        snapshot = snapshot.with_text("name", name);
    }
    if let Some(description) = args.description {
        snapshot = snapshot.with_text("description", description);
    }

    let mut draft = NewApproval::new(TenantId(args.tenant), PrincipalId(args.requested_by))
        .with_snapshot(snapshot)
        .with_priority(args.priority.unwrap_or_default());
    if let Some(reason) = args.reason {
        draft = draft.with_reason(reason);
    }

    let approval = match args.kind {
        SubjectKind::Expense => service.create_expense(&args.subject_id, draft, args.mode).await?,
        SubjectKind::Project => service.create_project(&args.subject_id, draft).await?,
        SubjectKind::Budget => {
            let mut department = DepartmentRef::new(args.subject_id);
            if let Some(manager) = args.manager {
                department = department.with_manager(PrincipalId(manager));
            }
            service.create_budget(department, draft).await?
        }
    };

    Ok((
        format!("opened `{}` with {} step(s)", approval.id, approval.steps.len()),
        to_value(&approval),
    ))
}

fn classify(error: &InterfaceError) -> (&'static str, u8) {
    match error {
        InterfaceError::BadRequest { .. } => ("bad_request", 10),
        InterfaceError::Forbidden { .. } => ("forbidden", 11),
        InterfaceError::NotFound { .. } => ("not_found", 12),
        InterfaceError::Conflict { .. } => ("conflict", 13),
        InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", 14),
        InterfaceError::Internal { .. } => ("internal", 15),
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value)
        .unwrap_or_else(|error| json!({ "serialization_error": error.to_string() }))
}

fn parse_role(value: &str) -> Result<Role, String> {
    Role::parse(value).ok_or_else(|| format!("unknown role `{value}`"))
}

fn parse_status(value: &str) -> Result<ApprovalStatus, String> {
    ApprovalStatus::parse(value).ok_or_else(|| format!("unknown status `{value}`"))
}

fn parse_category(value: &str) -> Result<ApprovalCategory, String> {
    ApprovalCategory::parse(value).ok_or_else(|| format!("unknown category `{value}`"))
}

fn parse_priority(value: &str) -> Result<Priority, String> {
    Priority::parse(value).ok_or_else(|| format!("unknown priority `{value}`"))
}

fn parse_mode(value: &str) -> Result<WorkflowMode, String> {
    WorkflowMode::parse(value).ok_or_else(|| format!("unknown workflow mode `{value}`"))
}

fn parse_action(value: &str) -> Result<StepAction, String> {
    StepAction::parse(value).ok_or_else(|| format!("unknown action `{value}`"))
}

fn parse_amount(value: &str) -> Result<Decimal, String> {
    value.trim().parse::<Decimal>().map_err(|error| format!("invalid amount `{value}`: {error}"))
}
