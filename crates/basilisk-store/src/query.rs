use basilisk_core::{MediaRef, MessageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rows per page when the caller does not ask for a size.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
/// Hard ceiling on rows per page.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Sortable message columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    ScheduledAt,
    Status,
    Id,
}

impl SortField {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::ScheduledAt => "scheduled_at",
            SortField::Status => "status",
            SortField::Id => "id",
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created_at" | "createdAt" => Ok(SortField::CreatedAt),
            "scheduled_at" | "scheduledAt" => Ok(SortField::ScheduledAt),
            "status" => Ok(SortField::Status),
            "id" => Ok(SortField::Id),
            other => Err(format!("unknown sort field: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// Filter, sort and page parameters for a message listing.
///
/// Every filter is optional; an empty query returns all rows, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageQuery {
    pub status: Option<MessageStatus>,
    /// Inclusive lower bound on `scheduled_at`.
    pub scheduled_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `scheduled_at`.
    pub scheduled_to: Option<DateTime<Utc>>,
    pub media_ref: Option<MediaRef>,
    /// Case-insensitive substring match on content or external post id.
    pub search: Option<String>,
    pub sort: SortField,
    pub order: SortOrder,
    /// 1-based. `0` is treated as `1`.
    pub page: u32,
    /// `0` means [`DEFAULT_PAGE_LIMIT`]; anything above [`MAX_PAGE_LIMIT`] is clamped.
    pub limit: u32,
}

impl MessageQuery {
    pub(crate) fn page_window(&self) -> (u32, u32) {
        page_window(self.page, self.limit)
    }
}

/// Paginated filename search over the media catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaQuery {
    pub kind: Option<basilisk_core::MessageKind>,
    pub search: Option<String>,
    pub page: u32,
    pub limit: u32,
}

impl MediaQuery {
    pub(crate) fn page_window(&self) -> (u32, u32) {
        page_window(self.page, self.limit)
    }
}

/// Normalised `(page, limit)`.
fn page_window(page: u32, limit: u32) -> (u32, u32) {
    let limit = match limit {
        0 => DEFAULT_PAGE_LIMIT,
        n => n.min(MAX_PAGE_LIMIT),
    };
    (page.max(1), limit)
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(self.limit as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(page_window(0, 0), (1, DEFAULT_PAGE_LIMIT));
        assert_eq!(page_window(3, 500), (3, MAX_PAGE_LIMIT));
    }

    #[test]
    fn sort_field_accepts_both_spellings() {
        assert_eq!("scheduledAt".parse::<SortField>(), Ok(SortField::ScheduledAt));
        assert_eq!("scheduled_at".parse::<SortField>(), Ok(SortField::ScheduledAt));
        assert!("content".parse::<SortField>().is_err());
    }

    #[test]
    fn total_pages_rounds_up() {
        let page: Page<()> = Page {
            items: vec![],
            total: 41,
            page: 1,
            limit: 20,
        };
        assert_eq!(page.total_pages(), 3);
    }
}
