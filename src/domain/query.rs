//! Filter, sort and page parameters for listing active deposits.

use serde::{Deserialize, Serialize};

use super::active_deposit::{ActiveDeposit, DepositStatus};
use super::ids::UserId;

/// Restricts which deposits are listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositFilter {
    /// Only deposits owned by this user.
    pub user_id: Option<UserId>,
    /// Only deposits in this status.
    pub status: Option<DepositStatus>,
    /// Only deposits under this plan.
    pub plan_name: Option<String>,
}

impl DepositFilter {
    /// Returns `true` if `deposit` passes every set criterion.
    #[must_use]
    pub fn matches(&self, deposit: &ActiveDeposit) -> bool {
        self.user_id.is_none_or(|id| deposit.user_id == id)
            && self.status.is_none_or(|s| deposit.status == s)
            && self
                .plan_name
                .as_deref()
                .is_none_or(|name| deposit.plan_name == name)
    }
}

/// Ordering of listed deposits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositSort {
    /// Newest first.
    #[default]
    NewestFirst,
    /// Oldest first.
    OldestFirst,
    /// Largest principal first.
    LargestPrincipal,
    /// Closest to maturity first.
    MaturingSoonest,
}

impl DepositSort {
    /// Parses the query-string representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "newest_first" | "newest" => Some(Self::NewestFirst),
            "oldest_first" | "oldest" => Some(Self::OldestFirst),
            "largest_principal" | "largest" => Some(Self::LargestPrincipal),
            "maturing_soonest" | "maturing" => Some(Self::MaturingSoonest),
            _ => None,
        }
    }

    /// Sorts `deposits` in place. Ties fall back to creation order.
    pub fn apply(&self, deposits: &mut [ActiveDeposit]) {
        match self {
            Self::NewestFirst => deposits.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            Self::OldestFirst => deposits.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            Self::LargestPrincipal => deposits.sort_by(|a, b| {
                b.principal
                    .cmp(&a.principal)
                    .then(a.created_at.cmp(&b.created_at))
            }),
            Self::MaturingSoonest => deposits.sort_by(|a, b| {
                a.remaining_duration_ms
                    .cmp(&b.remaining_duration_ms)
                    .then(a.created_at.cmp(&b.created_at))
            }),
        }
    }
}

/// A window into a sorted listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-indexed page number.
    pub page: u32,
    /// Items per page.
    pub per_page: u32,
}

impl PageRequest {
    /// Largest accepted page size.
    pub const MAX_PER_PAGE: u32 = 100;

    /// Builds a page request, clamping both values into range.
    #[must_use]
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    /// Number of items skipped before this page.
    #[must_use]
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.per_page as usize)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Items across all pages.
    pub total: usize,
    /// The request that produced this page.
    pub request: PageRequest,
}

impl<T> Page<T> {
    /// Cuts the page described by `request` out of `all`.
    #[must_use]
    pub fn slice(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(request.offset())
            .take(request.per_page as usize)
            .collect();
        Self {
            items,
            total,
            request,
        }
    }

    /// Number of pages needed for `total` items.
    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.request.per_page as usize)
    }
}
