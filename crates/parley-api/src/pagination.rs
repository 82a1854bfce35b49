//! Page-number pagination with the `{count, total_pages, ...}` envelope.

use axum::http::Uri;

use parley_types::api::Paginated;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizes {
    pub default: u32,
    pub max: u32,
}

pub const USER_PAGES: PageSizes = PageSizes { default: 15, max: 100 };
pub const MESSAGE_PAGES: PageSizes = PageSizes { default: 20, max: 100 };
pub const CONVERSATION_PAGES: PageSizes = PageSizes { default: 10, max: 50 };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u32,
}

impl PageRequest {
    /// `page` is 1-based. A missing or zero `page_size` falls back to the
    /// default; anything above the maximum is clamped.
    pub fn new(page: Option<u64>, page_size: Option<u32>, sizes: PageSizes) -> Result<Self, ApiError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(ApiError::NotFound("invalid page".into()));
        }
        let page_size = match page_size {
            None | Some(0) => sizes.default,
            Some(n) => n.min(sizes.max),
        };
        // Offsets are bound as SQLite integers.
        let in_range = (page - 1)
            .checked_mul(page_size as u64)
            .is_some_and(|offset| offset <= i64::MAX as u64);
        if !in_range {
            return Err(ApiError::NotFound("invalid page".into()));
        }
        Ok(Self { page, page_size })
    }

    pub fn limit(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.page_size as u64
    }

    /// Wrap one page of results. An empty result set still has one page;
    /// asking past the last page is a 404.
    pub fn finish<T>(self, count: u64, results: Vec<T>, uri: &Uri) -> Result<Paginated<T>, ApiError> {
        let total_pages = count.div_ceil(self.page_size as u64).max(1);
        if self.page > total_pages {
            return Err(ApiError::NotFound("invalid page".into()));
        }
        Ok(Paginated {
            count,
            total_pages,
            current_page: self.page,
            next: (self.page < total_pages).then(|| page_link(uri, Some(self.page + 1))),
            previous: (self.page > 1).then(|| {
                page_link(uri, (self.page > 2).then_some(self.page - 1))
            }),
            page_size: self.page_size,
            results,
        })
    }
}

/// Same path and query with `page` replaced. `None` drops the parameter.
fn page_link(uri: &Uri, page: Option<u64>) -> String {
    let mut params: Vec<String> = uri
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|p| !p.is_empty() && *p != "page" && !p.starts_with("page="))
        .map(str::to_string)
        .collect();
    if let Some(page) = page {
        params.push(format!("page={}", page));
    }
    if params.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), params.join("&"))
    }
}
