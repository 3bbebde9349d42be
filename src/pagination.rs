use crate::config::ApiConfig;
use crate::document::Links;
use crate::params::ParamsError;
use crate::query::Query;

/// One page of a collection: a 1-based page number and a page size, where
/// size 0 turns pagination off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub number: u64,
    pub size: u64,
}

impl Pagination {
    /// The requested page, defaulting to the first page of the configured
    /// size and never larger than `max_page_size`.
    ///
    /// # Errors
    /// A page number of 0.
    pub fn new(config: &ApiConfig, number: Option<u64>, size: Option<u64>) -> Result<Self, ParamsError> {
        let number = number.unwrap_or(1);
        if number == 0 {
            return Err(ParamsError::InvalidNumber {
                param: "page[number]".to_string(),
                value: "0".to_string(),
            });
        }
        let size = size.unwrap_or(config.page_size).min(config.max_page_size);
        Ok(Self { number, size })
    }

    pub fn is_enabled(&self) -> bool {
        self.size > 0
    }

    pub fn offset(&self) -> u64 {
        (self.number - 1).saturating_mul(self.size)
    }

    /// Restrict `query` to this page.
    #[must_use]
    pub fn apply(&self, query: Query) -> Query {
        if self.is_enabled() {
            query.window(Some(self.offset()), Some(self.size))
        } else {
            query
        }
    }

    /// Number of the last page for `total` rows; at least 1.
    pub fn last_page(&self, total: u64) -> u64 {
        if self.is_enabled() {
            total.div_ceil(self.size).max(1)
        } else {
            1
        }
    }

    fn page_url(&self, url: &str, number: u64) -> String {
        format!("{url}?page[number]={number}&page[size]={}", self.size)
    }

    /// `first`, `last`, `prev` and `next` links below `url`; `prev` and
    /// `next` only where such a page exists.
    pub fn links(&self, url: &str, total: u64) -> Links {
        let mut links = Links::new();
        if !self.is_enabled() {
            links.insert("first".to_string(), url.to_string());
            links.insert("last".to_string(), url.to_string());
            return links;
        }
        let last = self.last_page(total);
        links.insert("first".to_string(), self.page_url(url, 1));
        links.insert("last".to_string(), self.page_url(url, last));
        if self.number > 1 {
            let prev = (self.number - 1).min(last);
            links.insert("prev".to_string(), self.page_url(url, prev));
        }
        if self.number < last {
            links.insert("next".to_string(), self.page_url(url, self.number + 1));
        }
        links
    }
}
