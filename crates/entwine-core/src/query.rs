//! Pagination and sorting types

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::limits::MAX_PAGE_LIMIT;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Sort key that orders by identifier
pub const ID_SORT_KEY: &str = "id";

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Page request: offset window plus sort order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: i64,

    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default = "default_sort_key")]
    pub sort_key: String,

    #[serde(default)]
    pub direction: SortDirection,
}

fn default_limit() -> i64 {
    20
}

fn default_sort_key() -> String {
    ID_SORT_KEY.to_string()
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: default_limit(),
            sort_key: default_sort_key(),
            direction: SortDirection::Asc,
        }
    }
}

impl PageRequest {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset,
            limit,
            ..Default::default()
        }
    }

    pub fn sort_by(mut self, key: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_key = key.into();
        self.direction = direction;
        self
    }

    /// Check bounds and return `(offset, limit)`
    pub fn window(&self) -> Result<(usize, usize)> {
        if self.offset < 0 {
            return Err(Error::InvalidArgument(format!(
                "offset must not be negative (got {})",
                self.offset
            )));
        }
        if self.limit <= 0 {
            return Err(Error::InvalidArgument(format!(
                "limit must be greater than 0 (got {})",
                self.limit
            )));
        }
        let offset = usize::try_from(self.offset)
            .map_err(|_| Error::InvalidArgument(format!("offset {} is too large", self.offset)))?;
        let limit = usize::try_from(self.limit)
            .ok()
            .filter(|limit| *limit <= MAX_PAGE_LIMIT)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "limit must not exceed {} (got {})",
                    MAX_PAGE_LIMIT, self.limit
                ))
            })?;
        Ok((offset, limit))
    }

    /// Compare two entities by the sort key, tie-breaking on identifier ascending
    pub fn compare(&self, a: &Entity, b: &Entity) -> Ordering {
        let primary = if self.sort_key == ID_SORT_KEY {
            a.id().cmp(&b.id())
        } else {
            let null = Value::Null;
            let va = a.scalar(&self.sort_key).unwrap_or(&null);
            let vb = b.scalar(&self.sort_key).unwrap_or(&null);
            va.sort_cmp(vb)
        };
        let primary = match self.direction {
            SortDirection::Asc => primary,
            SortDirection::Desc => primary.reverse(),
        };
        primary.then_with(|| a.id().cmp(&b.id()))
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// The data for this page
    pub data: Vec<T>,

    /// Pagination metadata
    pub info: PageInfo,
}

/// Pagination metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub offset: usize,
    pub limit: usize,
    pub total_count: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl PageInfo {
    pub fn new(offset: usize, limit: usize, total_count: usize) -> Self {
        Self {
            offset,
            limit,
            total_count,
            has_next_page: offset.saturating_add(limit) < total_count,
            has_previous_page: offset > 0,
        }
    }
}

/// Sort `items` and cut out the requested window
pub fn paginate(mut items: Vec<Entity>, request: &PageRequest) -> Result<Page<Entity>> {
    let (offset, limit) = request.window()?;
    items.sort_by(|a, b| request.compare(a, b));
    let total = items.len();
    let data = items.into_iter().skip(offset).take(limit).collect();
    Ok(Page {
        data,
        info: PageInfo::new(offset, limit, total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: u64, credits: i64) -> Entity {
        let mut e = Entity::new("Course").with_attribute("credits", credits);
        e.assign_id(crate::EntityId(id));
        e
    }

    fn ids(page: &Page<Entity>) -> Vec<u64> {
        page.data.iter().filter_map(|e| e.id().map(|id| id.0)).collect()
    }

    #[test]
    fn test_window_validation() {
        assert!(matches!(
            PageRequest::new(-1, 5).window(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            PageRequest::new(0, 0).window(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            PageRequest::new(3, 5000).window(),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(PageRequest::new(3, 1000).window().unwrap(), (3, MAX_PAGE_LIMIT));
    }

    #[test]
    fn test_sort_ties_break_on_id() {
        let items = vec![entity(4, 3), entity(1, 5), entity(3, 3), entity(2, 5)];
        let request = PageRequest::new(0, 10).sort_by("credits", SortDirection::Desc);
        let page = paginate(items, &request).unwrap();
        assert_eq!(ids(&page), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_page_info() {
        let info = PageInfo::new(5, 5, 12);
        assert!(info.has_next_page);
        assert!(info.has_previous_page);
        let info = PageInfo::new(10, 5, 12);
        assert!(!info.has_next_page);
    }

    #[test]
    fn test_descending_by_id() {
        let items = (1..=6).map(|i| entity(i, 1)).collect();
        let request = PageRequest::new(0, 3).sort_by(ID_SORT_KEY, SortDirection::Desc);
        let page = paginate(items, &request).unwrap();
        assert_eq!(ids(&page), vec![6, 5, 4]);
    }
}
