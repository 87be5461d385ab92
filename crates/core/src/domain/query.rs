use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalCategory, ApprovalRequest, ApprovalStatus, SubjectType};
use crate::domain::principal::PrincipalId;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Optional narrowing applied to per-tenant listings. `None` fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFilter {
    pub status: Option<ApprovalStatus>,
    pub category: Option<ApprovalCategory>,
    pub subject_type: Option<SubjectType>,
    pub requested_by: Option<PrincipalId>,
}

impl ApprovalFilter {
    pub fn pending() -> Self {
        Self { status: Some(ApprovalStatus::Pending), ..Self::default() }
    }

    pub fn matches(&self, approval: &ApprovalRequest) -> bool {
        self.status.map_or(true, |status| approval.status == status)
            && self.category.map_or(true, |category| approval.category == category)
            && self
                .subject_type
                .map_or(true, |subject_type| approval.subject.subject_type == subject_type)
            && self
                .requested_by
                .as_ref()
                .map_or(true, |requested_by| &approval.requested_by == requested_by)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: DEFAULT_PAGE_LIMIT, offset: 0 }
    }
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }.clamped()
    }

    pub fn clamped(self) -> Self {
        Self { limit: self.limit.clamp(1, MAX_PAGE_LIMIT), offset: self.offset }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStatistics {
    pub total: u64,
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub cancelled: u64,
}

impl ApprovalStatistics {
    pub fn record(&mut self, status: ApprovalStatus, count: u64) {
        self.total += count;
        match status {
            ApprovalStatus::Pending => self.pending += count,
            ApprovalStatus::Approved => self.approved += count,
            ApprovalStatus::Rejected => self.rejected += count,
            ApprovalStatus::Cancelled => self.cancelled += count,
        }
    }
}
