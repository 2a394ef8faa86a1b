//! Lazy iteration over paged catalog list endpoints.
//!
//! Pages are pulled one at a time, so a consumer that stops early (a playlist
//! found by name) never fetches the remaining pages.

use std::collections::VecDeque;

use crate::catalog::{CatalogError, Page};

/// Single-pass cursor over a paged endpoint.
///
/// `fetch` receives the offset of the first item of the requested page. The
/// first page is fetched on first access; it also provides the total count.
pub struct PagingIterator<T, F>
where
    F: FnMut(usize) -> Result<Page<T>, CatalogError>,
{
    fetch: F,
    buffer: VecDeque<T>,
    total: Option<usize>,
    yielded: usize,
    failed: bool,
}

impl<T, F> PagingIterator<T, F>
where
    F: FnMut(usize) -> Result<Page<T>, CatalogError>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            buffer: VecDeque::new(),
            total: None,
            yielded: 0,
            failed: false,
        }
    }

    /// Total item count reported by the endpoint.
    pub fn size(&mut self) -> Result<usize, CatalogError> {
        self.ensure_started()?;
        Ok(self.total.unwrap_or(0))
    }

    pub fn has_next(&mut self) -> Result<bool, CatalogError> {
        if self.failed {
            return Ok(false);
        }
        self.ensure_started()?;
        Ok(!self.buffer.is_empty() || self.yielded < self.total.unwrap_or(0))
    }

    fn ensure_started(&mut self) -> Result<(), CatalogError> {
        if self.total.is_none() {
            self.load_page()?;
        }
        Ok(())
    }

    fn load_page(&mut self) -> Result<(), CatalogError> {
        match (self.fetch)(self.yielded) {
            Ok(page) => {
                log::trace!(
                    "Fetched page at offset {}: {} of {} items",
                    self.yielded,
                    page.items.len(),
                    page.total
                );
                // An empty page ends the listing even if the total says otherwise
                self.total = Some(if page.items.is_empty() { self.yielded } else { page.total });
                self.buffer.extend(page.items);
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }
}

impl<T, F> Iterator for PagingIterator<T, F>
where
    F: FnMut(usize) -> Result<Page<T>, CatalogError>,
{
    type Item = Result<T, CatalogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.buffer.is_empty() {
            let more = match self.total {
                None => true,
                Some(total) => self.yielded < total,
            };
            if !more {
                return None;
            }
            if let Err(e) = self.load_page() {
                return Some(Err(e));
            }
        }
        let item = self.buffer.pop_front()?;
        self.yielded += 1;
        Some(Ok(item))
    }
}
