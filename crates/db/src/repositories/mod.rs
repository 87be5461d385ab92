use async_trait::async_trait;
use thiserror::Error;

use fintrack_core::domain::approval::{ApprovalId, ApprovalRequest, SubjectType, TenantId};
use fintrack_core::domain::query::{ApprovalFilter, ApprovalStatistics, Page, PageResult};

pub mod approval;
pub mod memory;

pub use approval::SqlApprovalRepository;
pub use memory::InMemoryApprovalRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("approval `{id}` was modified concurrently (expected stored version {expected})")]
    VersionConflict { id: ApprovalId, expected: u32 },
    #[error("approval `{0}` already exists")]
    AlreadyExists(ApprovalId),
    #[error("approval `{0}` not found")]
    NotFound(ApprovalId),
}

/// Persistence boundary for approval requests.
///
/// `update` is a compare-and-swap: it writes only when the stored version still
/// equals `expected_version`, otherwise it fails with
/// [`RepositoryError::VersionConflict`] and leaves the row untouched. A missing
/// row is [`RepositoryError::NotFound`].
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId)
        -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn insert(&self, approval: &ApprovalRequest) -> Result<(), RepositoryError>;

    async fn update(
        &self,
        approval: &ApprovalRequest,
        expected_version: u32,
    ) -> Result<(), RepositoryError>;

    async fn find_pending_for_subject(
        &self,
        tenant_id: &TenantId,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<Option<ApprovalRequest>, RepositoryError>;

    /// Pending requests of the tenant, oldest first.
    async fn list_pending(&self, tenant_id: &TenantId)
        -> Result<Vec<ApprovalRequest>, RepositoryError>;

    /// Filtered listing, newest first.
    async fn list(
        &self,
        tenant_id: &TenantId,
        filter: &ApprovalFilter,
        page: Page,
    ) -> Result<PageResult<ApprovalRequest>, RepositoryError>;

    async fn statistics(&self, tenant_id: &TenantId)
        -> Result<ApprovalStatistics, RepositoryError>;
}
