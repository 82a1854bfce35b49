//! Lazy page-at-a-time iteration over a table.

use crate::models::UserRow;
use crate::{Database, Result, StoreError};

/// Iterator that fetches one page per `next()` call. It ends at the first
/// empty page and after yielding an error.
pub struct LazyPages<T, F>
where
    F: FnMut(u32, u64) -> Result<Vec<T>>,
{
    fetch: F,
    page_size: u32,
    offset: u64,
    done: bool,
}

impl<T, F> LazyPages<T, F>
where
    F: FnMut(u32, u64) -> Result<Vec<T>>,
{
    pub fn new(page_size: u32, fetch: F) -> Result<Self> {
        if page_size == 0 {
            return Err(StoreError::Validation("page size must be positive".into()));
        }
        Ok(Self {
            fetch,
            page_size,
            offset: 0,
            done: false,
        })
    }

    /// Rows consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<T, F> Iterator for LazyPages<T, F>
where
    F: FnMut(u32, u64) -> Result<Vec<T>>,
{
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match (self.fetch)(self.page_size, self.offset) {
            Ok(page) if page.is_empty() => {
                self.done = true;
                None
            }
            Ok(page) => {
                self.offset += page.len() as u64;
                // A short page is the last one.
                if page.len() < self.page_size as usize {
                    self.done = true;
                }
                Some(Ok(page))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<T, F> std::iter::FusedIterator for LazyPages<T, F> where F: FnMut(u32, u64) -> Result<Vec<T>> {}

impl Database {
    /// Users in insertion order, `page_size` rows per page, fetched on demand.
    pub fn lazy_paginate_users(
        &self,
        page_size: u32,
    ) -> Result<LazyPages<UserRow, impl FnMut(u32, u64) -> Result<Vec<UserRow>> + '_>> {
        LazyPages::new(page_size, move |limit, offset| self.paginate_users(limit, offset))
    }
}
