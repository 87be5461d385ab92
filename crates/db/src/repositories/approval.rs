use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use fintrack_core::domain::approval::{
    ApprovalCategory, ApprovalId, ApprovalRequest, ApprovalStatus, ApprovalSteps, Priority,
    SubjectRef, SubjectSnapshot, SubjectType, TenantId, WorkflowMode,
};
use fintrack_core::domain::principal::PrincipalId;
use fintrack_core::domain::query::{ApprovalFilter, ApprovalStatistics, Page, PageResult};

use super::{ApprovalRepository, RepositoryError};
use crate::DbPool;

const APPROVAL_COLUMNS: &str = "id, tenant_id, category, status, priority, subject_type, \
     subject_id, snapshot_json, steps_json, requested_by, request_reason, workflow_mode, amount, \
     currency, version, created_at, updated_at, completed_at";

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

fn unknown(column: &str, value: &str) -> RepositoryError {
    RepositoryError::Decode(format!("{column}: unknown value `{value}`"))
}

fn encode_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn row_to_approval(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let category: String = column(row, "category")?;
    let status: String = column(row, "status")?;
    let priority: String = column(row, "priority")?;
    let subject_type: String = column(row, "subject_type")?;
    let workflow_mode: String = column(row, "workflow_mode")?;
    let snapshot_json: String = column(row, "snapshot_json")?;
    let steps_json: String = column(row, "steps_json")?;
    let amount: Option<String> = column(row, "amount")?;
    let version: i64 = column(row, "version")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;
    let completed_at: Option<String> = column(row, "completed_at")?;

    let snapshot: SubjectSnapshot = serde_json::from_str(&snapshot_json)
        .map_err(|e| RepositoryError::Decode(format!("snapshot_json: {e}")))?;
    let steps: ApprovalSteps = serde_json::from_str(&steps_json)
        .map_err(|e| RepositoryError::Decode(format!("steps_json: {e}")))?;
    let amount = amount
        .map(|raw| Decimal::from_str(&raw).map_err(|e| RepositoryError::Decode(format!("amount: {e}"))))
        .transpose()?;

    Ok(ApprovalRequest {
        id: ApprovalId(column(row, "id")?),
        category: ApprovalCategory::parse(&category).ok_or_else(|| unknown("category", &category))?,
        status: ApprovalStatus::parse(&status).ok_or_else(|| unknown("status", &status))?,
        priority: Priority::parse(&priority).ok_or_else(|| unknown("priority", &priority))?,
        subject: SubjectRef {
            subject_type: SubjectType::parse(&subject_type)
                .ok_or_else(|| unknown("subject_type", &subject_type))?,
            subject_id: column(row, "subject_id")?,
            snapshot,
        },
        tenant_id: TenantId(column(row, "tenant_id")?),
        requested_by: PrincipalId(column(row, "requested_by")?),
        request_reason: column(row, "request_reason")?,
        workflow_mode: WorkflowMode::parse(&workflow_mode)
            .ok_or_else(|| unknown("workflow_mode", &workflow_mode))?,
        steps,
        amount,
        currency: column(row, "currency")?,
        version: u32::try_from(version)
            .map_err(|_| RepositoryError::Decode(format!("version: out of range `{version}`")))?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        completed_at: completed_at
            .map(|raw| parse_timestamp("completed_at", &raw))
            .transpose()?,
    })
}

fn push_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a ApprovalFilter) {
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(category) = filter.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(subject_type) = filter.subject_type {
        builder.push(" AND subject_type = ").push_bind(subject_type.as_str());
    }
    if let Some(requested_by) = &filter.requested_by {
        builder.push(" AND requested_by = ").push_bind(requested_by.0.as_str());
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {APPROVAL_COLUMNS} FROM approval_request WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_approval(r)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, approval: &ApprovalRequest) -> Result<(), RepositoryError> {
        let snapshot_json = encode_json("snapshot_json", &approval.subject.snapshot)?;
        let steps_json = encode_json("steps_json", &approval.steps)?;

        let result = sqlx::query(
            "INSERT INTO approval_request (id, tenant_id, category, status, priority, subject_type,
                                           subject_id, snapshot_json, steps_json, requested_by,
                                           request_reason, workflow_mode, amount, currency,
                                           version, created_at, updated_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(&approval.tenant_id.0)
        .bind(approval.category.as_str())
        .bind(approval.status.as_str())
        .bind(approval.priority.as_str())
        .bind(approval.subject.subject_type.as_str())
        .bind(&approval.subject.subject_id)
        .bind(snapshot_json)
        .bind(steps_json)
        .bind(&approval.requested_by.0)
        .bind(&approval.request_reason)
        .bind(approval.workflow_mode.as_str())
        .bind(approval.amount.map(|amount| amount.to_string()))
        .bind(&approval.currency)
        .bind(i64::from(approval.version))
        .bind(format_timestamp(&approval.created_at))
        .bind(format_timestamp(&approval.updated_at))
        .bind(approval.completed_at.as_ref().map(format_timestamp))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(RepositoryError::AlreadyExists(approval.id.clone()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn update(
        &self,
        approval: &ApprovalRequest,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let steps_json = encode_json("steps_json", &approval.steps)?;

        let result = sqlx::query(
            "UPDATE approval_request
             SET status = ?, priority = ?, steps_json = ?, version = ?, updated_at = ?,
                 completed_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(approval.status.as_str())
        .bind(approval.priority.as_str())
        .bind(steps_json)
        .bind(i64::from(approval.version))
        .bind(format_timestamp(&approval.updated_at))
        .bind(approval.completed_at.as_ref().map(format_timestamp))
        .bind(&approval.id.0)
        .bind(i64::from(expected_version))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM approval_request WHERE id = ?")
                .bind(&approval.id.0)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            if !exists {
                return Err(RepositoryError::NotFound(approval.id.clone()));
            }
            return Err(RepositoryError::VersionConflict {
                id: approval.id.clone(),
                expected: expected_version,
            });
        }
        Ok(())
    }

    async fn find_pending_for_subject(
        &self,
        tenant_id: &TenantId,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_request
             WHERE tenant_id = ? AND subject_type = ? AND subject_id = ? AND status = 'pending'
             ORDER BY created_at ASC
             LIMIT 1"
        ))
        .bind(&tenant_id.0)
        .bind(subject_type.as_str())
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn list_pending(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_request
             WHERE tenant_id = ? AND status = 'pending'
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        filter: &ApprovalFilter,
        page: Page,
    ) -> Result<PageResult<ApprovalRequest>, RepositoryError> {
        let page = page.clamped();

        let mut count =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM approval_request WHERE tenant_id = ");
        count.push_bind(tenant_id.0.as_str());
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_request WHERE tenant_id = "
        ));
        select.push_bind(tenant_id.0.as_str());
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset));
        let rows = select.build().fetch_all(&self.pool).await?;

        Ok(PageResult {
            items: rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()?,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn statistics(
        &self,
        tenant_id: &TenantId,
    ) -> Result<ApprovalStatistics, RepositoryError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM approval_request
             WHERE tenant_id = ?
             GROUP BY status",
        )
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut statistics = ApprovalStatistics::default();
        for row in &rows {
            let status: String = column(row, "status")?;
            let count: i64 = column(row, "count")?;
            let status = ApprovalStatus::parse(&status).ok_or_else(|| unknown("status", &status))?;
            statistics.record(status, u64::try_from(count).unwrap_or_default());
        }
        Ok(statistics)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use fintrack_core::approvals::factory::{ApprovalFactory, DepartmentRef, NewApproval};
    use fintrack_core::approvals::transition::{apply_decision, cancel, StepDecision};
    use fintrack_core::domain::approval::{
        ApprovalCategory, ApprovalId, ApprovalRequest, ApprovalStatus, StepStatus, SubjectSnapshot,
        SubjectType, TenantId, WorkflowMode,
    };
    use fintrack_core::domain::principal::{Principal, PrincipalId, Role};
    use fintrack_core::domain::query::{ApprovalFilter, Page};

    use super::SqlApprovalRepository;
    use crate::repositories::{ApprovalRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlApprovalRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlApprovalRepository::new(pool)
    }

    fn draft(tenant: &str, snapshot: SubjectSnapshot) -> NewApproval {
        NewApproval::new(TenantId(tenant.to_string()), PrincipalId("u-req".to_string()))
            .with_snapshot(snapshot)
    }

    fn expense(tenant: &str, expense_id: &str, amount: i64, offset_secs: i64) -> ApprovalRequest {
        ApprovalFactory::default()
            .expense(
                expense_id,
                draft(
                    tenant,
                    SubjectSnapshot::new()
                        .with_decimal("amount", Decimal::new(amount * 100 + 25, 2))
                        .with_text("description", "Conference travel")
                        .with_bool("billable", false),
                ),
                Some(WorkflowMode::MultiLevel),
                Utc::now() + Duration::seconds(offset_secs),
            )
            .expect("expense approval")
    }

    #[tokio::test]
    async fn insert_and_find_by_id_round_trips_every_field() {
        let repo = setup().await;
        let approval = expense("acme", "exp-1", 3_000, 0);

        repo.insert(&approval).await.expect("insert");
        let found = repo.find_by_id(&approval.id).await.expect("find").expect("should exist");

        assert_eq!(found, approval);
        assert_eq!(found.steps.len(), 2);
        assert_eq!(found.amount, Some(Decimal::new(300_025, 2)));
    }

    #[tokio::test]
    async fn missing_id_returns_none() {
        let repo = setup().await;
        let found = repo.find_by_id(&ApprovalId("apr_missing".to_string())).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn inserting_the_same_id_twice_is_rejected() {
        let repo = setup().await;
        let approval = expense("acme", "exp-1", 10, 0);

        repo.insert(&approval).await.expect("first insert");
        let error = repo.insert(&approval).await.expect_err("second insert");

        assert!(matches!(error, RepositoryError::AlreadyExists(ref id) if id == &approval.id));
    }

    #[tokio::test]
    async fn update_is_a_compare_and_swap_on_version() {
        let repo = setup().await;
        let approval = expense("acme", "exp-1", 10, 0);
        repo.insert(&approval).await.expect("insert");

        let mut winner = approval.clone();
        apply_decision(
            &mut winner,
            &Principal::new("u-sup", Role::Supervisor),
            &StepDecision::approve(),
            Utc::now(),
        )
        .expect("approve");
        repo.update(&winner, approval.version).await.expect("first writer wins");

        let mut loser = approval.clone();
        cancel(&mut loser, &Principal::new("u-req", Role::Employee), Utc::now()).expect("cancel");
        let error = repo.update(&loser, approval.version).await.expect_err("stale writer");
        assert!(matches!(error, RepositoryError::VersionConflict { expected: 1, .. }));

        let stored = repo.find_by_id(&approval.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, ApprovalStatus::Approved);
        assert_eq!(stored.version, 2);
        assert_eq!(stored.steps.get(1).map(|step| step.status), Some(StepStatus::Approved));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn update_of_unknown_approval_is_not_found() {
        let repo = setup().await;
        let approval = expense("acme", "exp-404", 10, 0);

        let error = repo.update(&approval, 1).await.expect_err("no stored row");
        assert!(matches!(error, RepositoryError::NotFound(ref id) if id == &approval.id));
        assert_eq!(repo.find_by_id(&approval.id).await.expect("find"), None);
    }

    #[tokio::test]
    async fn pending_subject_lookup_is_scoped_to_tenant_and_open_requests() {
        let repo = setup().await;
        let open = expense("acme", "exp-1", 10, 0);
        let other_tenant = expense("globex", "exp-2", 10, 0);
        let mut closed = expense("acme", "exp-3", 10, 0);
        cancel(&mut closed, &Principal::new("u-req", Role::Employee), Utc::now()).expect("cancel");

        for approval in [&open, &other_tenant, &closed] {
            repo.insert(approval).await.expect("insert");
        }

        let acme = TenantId("acme".to_string());
        let found = repo
            .find_pending_for_subject(&acme, SubjectType::Expense, "exp-1")
            .await
            .expect("lookup");
        assert_eq!(found.map(|approval| approval.id), Some(open.id));

        for subject_id in ["exp-2", "exp-3"] {
            let found = repo
                .find_pending_for_subject(&acme, SubjectType::Expense, subject_id)
                .await
                .expect("lookup");
            assert!(found.is_none(), "{subject_id} should not be pending for acme");
        }
    }

    #[tokio::test]
    async fn list_filters_paginates_and_orders_newest_first() {
        let repo = setup().await;
        let acme = TenantId("acme".to_string());

        for index in 0..5 {
            repo.insert(&expense("acme", &format!("exp-{index}"), 10, index)).await.expect("insert");
        }
        let budget = ApprovalFactory::default()
            .budget(
                DepartmentRef::new("dep-ops"),
                draft("acme", SubjectSnapshot::new().with_integer("total_budget", 50_000)),
                Utc::now() + Duration::seconds(10),
            )
            .expect("budget approval");
        repo.insert(&budget).await.expect("insert budget");

        let expenses = ApprovalFilter {
            category: Some(ApprovalCategory::Expense),
            ..ApprovalFilter::default()
        };
        let first_page = repo.list(&acme, &expenses, Page::new(2, 0)).await.expect("page 1");
        assert_eq!(first_page.total, 5);
        let ids: Vec<&str> =
            first_page.items.iter().map(|approval| approval.subject.subject_id.as_str()).collect();
        assert_eq!(ids, vec!["exp-4", "exp-3"]);

        let last_page = repo.list(&acme, &expenses, Page::new(2, 4)).await.expect("page 3");
        assert_eq!(last_page.items.len(), 1);
        assert_eq!(last_page.items[0].subject.subject_id, "exp-0");

        let departments = ApprovalFilter {
            subject_type: Some(SubjectType::Department),
            status: Some(ApprovalStatus::Pending),
            ..ApprovalFilter::default()
        };
        let listed = repo.list(&acme, &departments, Page::default()).await.expect("departments");
        assert_eq!(listed.total, 1);
        assert_eq!(listed.items[0].id, budget.id);

        let nobody = ApprovalFilter {
            requested_by: Some(PrincipalId("u-nobody".to_string())),
            ..ApprovalFilter::default()
        };
        assert_eq!(repo.list(&acme, &nobody, Page::default()).await.expect("empty").total, 0);
    }

    #[tokio::test]
    async fn list_pending_is_oldest_first_and_statistics_count_per_status() {
        let repo = setup().await;
        let acme = TenantId("acme".to_string());

        let older = expense("acme", "exp-1", 10, 0);
        let newer = expense("acme", "exp-2", 10, 5);
        let mut rejected = expense("acme", "exp-3", 10, 1);
        apply_decision(
            &mut rejected,
            &Principal::new("u-sup", Role::Supervisor),
            &StepDecision::reject("duplicate receipt"),
            Utc::now(),
        )
        .expect("reject");

        for approval in [&newer, &rejected, &older] {
            repo.insert(approval).await.expect("insert");
        }
        repo.insert(&expense("globex", "exp-9", 10, 0)).await.expect("other tenant");

        let pending = repo.list_pending(&acme).await.expect("pending");
        let ids: Vec<&ApprovalId> = pending.iter().map(|approval| &approval.id).collect();
        assert_eq!(ids, vec![&older.id, &newer.id]);

        let statistics = repo.statistics(&acme).await.expect("statistics");
        assert_eq!(statistics.total, 3);
        assert_eq!(statistics.pending, 2);
        assert_eq!(statistics.rejected, 1);
        assert_eq!(statistics.approved, 0);
    }
}
