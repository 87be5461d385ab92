use std::collections::HashMap;

use tokio::sync::RwLock;

use fintrack_core::domain::approval::{
    ApprovalId, ApprovalRequest, ApprovalStatus, SubjectType, TenantId,
};
use fintrack_core::domain::query::{ApprovalFilter, ApprovalStatistics, Page, PageResult};

use super::{ApprovalRepository, RepositoryError};

/// Map-backed repository with the same compare-and-swap semantics as the SQL one.
#[derive(Default)]
pub struct InMemoryApprovalRepository {
    approvals: RwLock<HashMap<String, ApprovalRequest>>,
}

impl InMemoryApprovalRepository {
    async fn tenant_matching(
        &self,
        tenant_id: &TenantId,
        filter: &ApprovalFilter,
    ) -> Vec<ApprovalRequest> {
        let approvals = self.approvals.read().await;
        approvals
            .values()
            .filter(|approval| &approval.tenant_id == tenant_id && filter.matches(approval))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals.get(&id.0).cloned())
    }

    async fn insert(&self, approval: &ApprovalRequest) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        if approvals.contains_key(&approval.id.0) {
            return Err(RepositoryError::AlreadyExists(approval.id.clone()));
        }
        approvals.insert(approval.id.0.clone(), approval.clone());
        Ok(())
    }

    async fn update(
        &self,
        approval: &ApprovalRequest,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write().await;
        match approvals.get_mut(&approval.id.0) {
            Some(stored) if stored.version == expected_version => {
                *stored = approval.clone();
                Ok(())
            }
            Some(_) => Err(RepositoryError::VersionConflict {
                id: approval.id.clone(),
                expected: expected_version,
            }),
            None => Err(RepositoryError::NotFound(approval.id.clone())),
        }
    }

    async fn find_pending_for_subject(
        &self,
        tenant_id: &TenantId,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .values()
            .filter(|approval| {
                &approval.tenant_id == tenant_id
                    && approval.status == ApprovalStatus::Pending
                    && approval.subject.subject_type == subject_type
                    && approval.subject.subject_id == subject_id
            })
            .min_by_key(|approval| approval.created_at)
            .cloned())
    }

    async fn list_pending(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let mut pending = self.tenant_matching(tenant_id, &ApprovalFilter::pending()).await;
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        filter: &ApprovalFilter,
        page: Page,
    ) -> Result<PageResult<ApprovalRequest>, RepositoryError> {
        let page = page.clamped();
        let mut matching = self.tenant_matching(tenant_id, filter).await;
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok(PageResult { items, total })
    }

    async fn statistics(
        &self,
        tenant_id: &TenantId,
    ) -> Result<ApprovalStatistics, RepositoryError> {
        let mut statistics = ApprovalStatistics::default();
        for approval in self.tenant_matching(tenant_id, &ApprovalFilter::default()).await {
            statistics.record(approval.status, 1);
        }
        Ok(statistics)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use fintrack_core::approvals::factory::{ApprovalFactory, NewApproval};
    use fintrack_core::approvals::transition::{cancel, StepDecision};
    use fintrack_core::domain::approval::{
        ApprovalRequest, ApprovalStatus, SubjectSnapshot, SubjectType, TenantId,
    };
    use fintrack_core::domain::principal::{Principal, PrincipalId, Role};
    use fintrack_core::domain::query::{ApprovalFilter, Page};

    use crate::repositories::{ApprovalRepository, InMemoryApprovalRepository, RepositoryError};

    fn project(tenant: &str, project_id: &str, offset_secs: i64) -> ApprovalRequest {
        ApprovalFactory::default()
            .project(
                project_id,
                NewApproval::new(TenantId(tenant.to_string()), PrincipalId("u-req".to_string()))
                    .with_snapshot(
                        SubjectSnapshot::new().with_decimal("total_budget", Decimal::from(12_000)),
                    ),
                Utc::now() + Duration::seconds(offset_secs),
            )
            .expect("project approval")
    }

    #[tokio::test]
    async fn in_memory_approval_repo_round_trip() {
        let repo = InMemoryApprovalRepository::default();
        let approval = project("acme", "prj-1", 0);

        repo.insert(&approval).await.expect("save approval");
        let found = repo.find_by_id(&approval.id).await.expect("find approval");

        assert_eq!(found, Some(approval.clone()));
        assert!(matches!(
            repo.insert(&approval).await,
            Err(RepositoryError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn update_of_unknown_approval_is_not_found() {
        let repo = InMemoryApprovalRepository::default();
        let approval = project("acme", "prj-404", 0);

        assert!(matches!(
            repo.update(&approval, 1).await,
            Err(RepositoryError::NotFound(ref id)) if id == &approval.id
        ));
        assert_eq!(repo.find_by_id(&approval.id).await.expect("find"), None);
    }

    #[tokio::test]
    async fn stale_update_is_refused() {
        let repo = InMemoryApprovalRepository::default();
        let approval = project("acme", "prj-1", 0);
        repo.insert(&approval).await.expect("insert");

        let mut first = approval.clone();
        fintrack_core::approvals::transition::apply_decision(
            &mut first,
            &Principal::new("u-sup", Role::Supervisor),
            &StepDecision::approve(),
            Utc::now(),
        )
        .expect("approve");
        repo.update(&first, 1).await.expect("first update");

        let mut second = approval.clone();
        cancel(&mut second, &Principal::new("u-adm", Role::Admin), Utc::now()).expect("cancel");
        assert!(matches!(
            repo.update(&second, 1).await,
            Err(RepositoryError::VersionConflict { expected: 1, .. })
        ));

        let stored = repo.find_by_id(&approval.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, ApprovalStatus::Pending);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn listing_matches_sql_ordering_and_paging() {
        let repo = InMemoryApprovalRepository::default();
        for index in 0..4 {
            repo.insert(&project("acme", &format!("prj-{index}"), index)).await.expect("insert");
        }
        repo.insert(&project("globex", "prj-x", 0)).await.expect("insert");
        let acme = TenantId("acme".to_string());

        let page = repo.list(&acme, &ApprovalFilter::default(), Page::new(3, 1)).await.expect("list");
        assert_eq!(page.total, 4);
        let ids: Vec<&str> =
            page.items.iter().map(|approval| approval.subject.subject_id.as_str()).collect();
        assert_eq!(ids, vec!["prj-2", "prj-1", "prj-0"]);

        let pending = repo.list_pending(&acme).await.expect("pending");
        assert_eq!(pending.first().map(|a| a.subject.subject_id.as_str()), Some("prj-0"));

        let found = repo
            .find_pending_for_subject(&acme, SubjectType::Project, "prj-3")
            .await
            .expect("lookup");
        assert!(found.is_some());

        let statistics = repo.statistics(&acme).await.expect("statistics");
        assert_eq!(statistics.total, 4);
        assert_eq!(statistics.pending, 4);
    }
}
