//! Group DTOs for list, create and detail responses.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::Group;

/// One group as shown in listings.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupSummaryDto {
    /// Group identifier.
    pub group_id: String,
    /// Target capacity.
    pub capacity: usize,
    /// Current member count.
    pub current_count: usize,
    /// Whether the group reached capacity. Full groups never reopen.
    pub full: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<&Group> for GroupSummaryDto {
    fn from(group: &Group) -> Self {
        Self {
            group_id: group.id().to_string(),
            capacity: group.capacity(),
            current_count: group.current_count(),
            full: group.is_full(),
            created_at: group.created_at(),
        }
    }
}

/// Response body for `GET /groups`.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupListResponse {
    /// All groups, accepting ones first.
    pub data: Vec<GroupSummaryDto>,
    /// Number of groups still accepting members.
    pub accepting: usize,
    /// Number of full groups.
    pub full: usize,
}

/// Response body for `GET /groups/{id}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupDetailResponse {
    /// Group summary.
    #[serde(flatten)]
    pub group: GroupSummaryDto,
    /// Member session IDs, sorted.
    pub members: Vec<String>,
}
