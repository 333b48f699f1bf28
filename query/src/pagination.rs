//! Page metadata wrappers over item vectors.
//!
//! Pages are 1-based. All paginators serialize as
//! `{items, currentPage, maxNumItemsPerPage[, totalItems, lastPage]}`.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 30;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;

/// Requested page and page size, clamped to valid bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: usize,
    pub max_num_items_per_page: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            current_page: 1,
            max_num_items_per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn new(current_page: usize, max_num_items_per_page: usize) -> Self {
        Self {
            current_page: current_page.max(1),
            max_num_items_per_page: max_num_items_per_page.max(1),
        }
    }

    /// Build from the raw `page` / `perPage` query parameters.
    ///
    /// Missing or unparsable values fall back to page 1 and
    /// `default_page_size`; `perPage` is clamped to `1..=max_page_size`.
    pub fn from_query(
        page: Option<&str>,
        per_page: Option<&str>,
        default_page_size: usize,
        max_page_size: usize,
    ) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        let max_page_size = max_page_size.max(1);
        let per_page = per_page
            .and_then(|p| p.trim().parse::<usize>().ok())
            .unwrap_or(default_page_size)
            .clamp(1, max_page_size);

        Self {
            current_page: page,
            max_num_items_per_page: per_page,
        }
    }

    /// Zero-based index of the first item on the page
    pub fn offset(&self) -> usize {
        (self.current_page - 1).saturating_mul(self.max_num_items_per_page)
    }

    pub fn limit(&self) -> usize {
        self.max_num_items_per_page
    }
}

/// A page of items without knowledge of the total count
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialPaginator<T> {
    pub items: Vec<T>,
    pub current_page: usize,
    pub max_num_items_per_page: usize,
}

impl<T> PartialPaginator<T> {
    pub fn new(items: Vec<T>, pagination: Pagination) -> Self {
        Self {
            items,
            current_page: pagination.current_page,
            max_num_items_per_page: pagination.max_num_items_per_page,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PartialPaginator<U> {
        PartialPaginator {
            items: self.items.into_iter().map(f).collect(),
            current_page: self.current_page,
            max_num_items_per_page: self.max_num_items_per_page,
        }
    }
}

/// A page of items together with the total item count
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullPaginator<T> {
    pub items: Vec<T>,
    pub current_page: usize,
    pub max_num_items_per_page: usize,
    pub total_items: usize,
    pub last_page: usize,
}

impl<T> FullPaginator<T> {
    pub fn new(items: Vec<T>, pagination: Pagination, total_items: usize) -> Self {
        Self {
            items,
            current_page: pagination.current_page,
            max_num_items_per_page: pagination.max_num_items_per_page,
            total_items,
            last_page: last_page(total_items, pagination.max_num_items_per_page),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> FullPaginator<U> {
        FullPaginator {
            items: self.items.into_iter().map(f).collect(),
            current_page: self.current_page,
            max_num_items_per_page: self.max_num_items_per_page,
            total_items: self.total_items,
            last_page: self.last_page,
        }
    }
}

/// Paginates a complete result set held in memory
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WholeResultPaginator<T> {
    pub items: Vec<T>,
    pub current_page: usize,
    pub max_num_items_per_page: usize,
    pub total_items: usize,
    pub last_page: usize,
}

impl<T> WholeResultPaginator<T> {
    pub fn new(all_items: Vec<T>, pagination: Pagination) -> Self {
        let total_items = all_items.len();
        let items = all_items
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.limit())
            .collect();

        Self {
            items,
            current_page: pagination.current_page,
            max_num_items_per_page: pagination.max_num_items_per_page,
            total_items,
            last_page: last_page(total_items, pagination.max_num_items_per_page),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

macro_rules! impl_into_iterator {
    ($($paginator:ident),*) => {
        $(
            impl<T> IntoIterator for $paginator<T> {
                type Item = T;
                type IntoIter = std::vec::IntoIter<T>;

                fn into_iter(self) -> Self::IntoIter {
                    self.items.into_iter()
                }
            }

            impl<'a, T> IntoIterator for &'a $paginator<T> {
                type Item = &'a T;
                type IntoIter = std::slice::Iter<'a, T>;

                fn into_iter(self) -> Self::IntoIter {
                    self.items.iter()
                }
            }
        )*
    };
}

impl_into_iterator!(PartialPaginator, FullPaginator, WholeResultPaginator);

fn last_page(total_items: usize, per_page: usize) -> usize {
    total_items.div_ceil(per_page.max(1)).max(1)
}
